//! ---
//! fab_section: "02-messaging"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Transport backends for publishing readings."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::{Result, TransportError};

/// Transport abstraction used by the publisher pool.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `payload` to `topic`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// A payload captured by [`InMemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic the payload was published to.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl PublishedMessage {
    /// Decode the payload as JSON.
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.payload)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    messages: Vec<PublishedMessage>,
    fail_next: usize,
}

/// In-process transport that records every publish. Cloning shares the
/// underlying buffer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` publishes with [`TransportError::Rejected`].
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    /// Copy of everything published so far.
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.state.lock().messages.clone()
    }

    /// Messages published to `topic`.
    pub fn messages_for(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    /// Remove and return everything published so far.
    pub fn drain(&self) -> Vec<PublishedMessage> {
        std::mem::take(&mut self.state.lock().messages)
    }

    /// Number of captured messages.
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// True when nothing has been published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::Rejected {
                topic: topic.to_owned(),
                reason: "injected failure".into(),
            });
        }
        state.messages.push(PublishedMessage {
            topic: topic.to_owned(),
            payload,
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Emits every reading as a tracing event on the `fabsim::readings` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let body = String::from_utf8_lossy(&payload);
        info!(target: "fabsim::readings", topic, payload = %body, "reading");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Appends `{"topic": .., "payload": ..}` lines to a file.
#[derive(Debug)]
pub struct JsonLinesTransport {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonLinesTransport {
    /// Open `path` for appending, creating it and its parent directory.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    /// File being appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Transport for JsonLinesTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        // Payloads are JSON documents; anything else is stored as a string.
        let payload = serde_json::from_slice::<Value>(&payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&payload).into_owned()));
        let mut line = serde_json::to_vec(&serde_json::json!({
            "topic": topic,
            "payload": payload,
        }))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ndjson"
    }
}
