//! ---
//! fab_section: "02-messaging"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Outbound batch types handed from device tasks to publishers."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use bytes::Bytes;

/// One serialized reading addressed to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Fully qualified topic.
    pub topic: String,
    /// Reading kind label, used for metrics.
    pub kind: &'static str,
    /// JSON payload.
    pub payload: Bytes,
}

impl OutboundRecord {
    /// Build a record from its parts.
    pub fn new(topic: impl Into<String>, kind: &'static str, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            kind,
            payload: payload.into(),
        }
    }
}

/// All records produced by one device tick. Batches are queued and published
/// as a unit so a tick is never split across queue slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundBatch {
    /// Device that produced the batch.
    pub machine_id: String,
    /// Records in publish order.
    pub records: Vec<OutboundRecord>,
}

impl OutboundBatch {
    /// Create a batch for `machine_id`.
    pub fn new(machine_id: impl Into<String>, records: Vec<OutboundRecord>) -> Self {
        Self {
            machine_id: machine_id.into(),
            records,
        }
    }

    /// Number of records carried.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the batch carries no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
