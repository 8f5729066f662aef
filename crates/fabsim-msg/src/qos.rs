//! ---
//! fab_section: "02-messaging"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Bounded exponential-backoff delivery."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::{Transport, TransportError};

/// Retry budget for one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single wait.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Fire-and-forget: a single attempt.
    pub const fn at_most_once() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Attempts actually made, never below one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait before retry number `retry` (1-based), doubling each time.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Result of [`deliver`].
#[derive(Debug)]
pub struct DeliveryReport {
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Last error when every attempt failed.
    pub error: Option<TransportError>,
}

impl DeliveryReport {
    /// True when the payload reached the transport.
    pub fn delivered(&self) -> bool {
        self.error.is_none()
    }

    /// Retries performed after the first attempt.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Publish with retries according to `policy`.
pub async fn deliver(
    transport: &dyn Transport,
    topic: &str,
    payload: Bytes,
    policy: &RetryPolicy,
) -> DeliveryReport {
    let max_attempts = policy.attempts();
    let mut attempts = 0;
    loop {
        attempts += 1;
        match transport.publish(topic, payload.clone()).await {
            Ok(()) => {
                return DeliveryReport {
                    attempts,
                    error: None,
                }
            }
            Err(err) if attempts >= max_attempts => {
                return DeliveryReport {
                    attempts,
                    error: Some(err),
                }
            }
            Err(err) => {
                let wait = policy.backoff(attempts);
                debug!(
                    transport = transport.name(),
                    topic,
                    attempt = attempts,
                    backoff_ms = wait.as_millis() as u64,
                    error = %err,
                    "publish failed; retrying"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryTransport;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy(5);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(250));
        assert_eq!(policy.backoff(40), Duration::from_millis(250));
        assert_eq!(RetryPolicy::at_most_once().attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_transport_recovers() {
        let transport = InMemoryTransport::new();
        transport.fail_next(2);
        let report = deliver(&transport, "t", Bytes::from_static(b"{}"), &policy(3)).await;
        assert!(report.delivered());
        assert_eq!(report.retries(), 2);
        assert_eq!(transport.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let transport = InMemoryTransport::new();
        transport.fail_next(10);
        let report = deliver(&transport, "t", Bytes::from_static(b"{}"), &policy(3)).await;
        assert!(!report.delivered());
        assert_eq!(report.attempts, 3);
        assert!(transport.is_empty());
    }
}
