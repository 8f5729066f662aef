//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Scheduler lateness sampling and summaries."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Keep at most this many samples; older ones are discarded first.
const MAX_SAMPLES: usize = 16_384;

/// Bounded reservoir of tick lateness samples, in microseconds.
#[derive(Debug, Default)]
pub struct JitterHistogram {
    samples: Mutex<Vec<f64>>,
}

impl JitterHistogram {
    pub fn record(&self, jitter: Duration) {
        let micros = jitter.as_secs_f64() * 1_000_000.0;
        let mut samples = self.samples.lock();
        if samples.len() >= MAX_SAMPLES {
            samples.drain(..MAX_SAMPLES / 2);
        }
        samples.push(micros);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> Option<JitterSummary> {
        let mut sorted = self.samples.lock().clone();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));
        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let percentile = |p: f64| {
            let rank = ((count - 1) as f64 * p).round() as usize;
            sorted[rank.min(count - 1)]
        };
        Some(JitterSummary {
            mean_us: mean,
            p50_us: percentile(0.50),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
            samples: count as u64,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JitterSummary {
    pub mean_us: f64,
    pub p50_us: f64,
    pub p99_us: f64,
    pub max_us: f64,
    pub samples: u64,
}
