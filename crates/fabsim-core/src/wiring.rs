//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Builds transports and publisher settings from configuration."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use fabsim_common::{TransportConfig, TransportKind};
use fabsim_metrics::SimulatorMetrics;
use fabsim_msg::{
    DeliveryObserver, InMemoryTransport, JsonLinesTransport, LogTransport, PublisherConfig,
    RetryPolicy, Transport,
};

/// Feeds publisher events into the simulator's prometheus counters.
#[derive(Clone)]
pub struct MetricsObserver {
    metrics: SimulatorMetrics,
}

impl MetricsObserver {
    pub fn new(metrics: SimulatorMetrics) -> Self {
        Self { metrics }
    }
}

impl DeliveryObserver for MetricsObserver {
    fn published(&self, _machine_id: &str, kind: &str) {
        self.metrics.record_published(kind);
    }

    fn retried(&self, _topic: &str) {
        self.metrics.record_retry();
    }

    fn failed(&self, _topic: &str) {
        self.metrics.record_publish_failure();
    }

    fn queue_dropped(&self, machine_id: &str) {
        self.metrics.record_queue_drop(machine_id);
    }
}

pub fn publisher_config(config: &TransportConfig) -> PublisherConfig {
    PublisherConfig {
        queue_capacity: config.queue_capacity,
        workers: config.workers,
        retry: RetryPolicy {
            max_attempts: config.retry.max_attempts,
            initial_backoff: config.retry.initial_backoff,
            max_backoff: config.retry.max_backoff,
        },
    }
}

/// Open the transport selected by `config.kind`.
pub async fn build_transport(config: &TransportConfig) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match config.kind {
        TransportKind::InMemory => Arc::new(InMemoryTransport::new()),
        TransportKind::Log => Arc::new(LogTransport),
        TransportKind::Ndjson => {
            let path = config
                .path
                .as_ref()
                .context("transport.path is required for the ndjson transport")?;
            let transport = JsonLinesTransport::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Arc::new(transport)
        }
    };
    Ok(transport)
}
