//! ---
//! fab_section: "02-messaging"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Reading transports, topic naming and outbound publishing."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Outbound side of FabSim: topics, transports and the publisher pool that
//! moves reading batches off the device tasks.

pub mod publisher;
pub mod qos;
pub mod topics;
pub mod transport;
pub mod types;

/// Shared result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Failures raised while handing a payload to a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport refused the payload.
    #[error("transport rejected publish to '{topic}': {reason}")]
    Rejected {
        /// Topic the payload was addressed to.
        topic: String,
        /// Backend-specific reason.
        reason: String,
    },
    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,
    /// Wrapper for IO errors encountered by file-backed transports.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON problems while framing records.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use publisher::{DeliveryObserver, Publisher, PublisherConfig, PublisherHandle, PublisherStats};
pub use qos::{deliver, DeliveryReport, RetryPolicy};
pub use topics::TopicScheme;
pub use transport::{
    InMemoryTransport, JsonLinesTransport, LogTransport, PublishedMessage, Transport,
};
pub use types::{OutboundBatch, OutboundRecord};
