//! ---
//! fab_section: "01-core-functionality"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Simulated wall clock anchored to the runtime's monotonic clock."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Maps tokio monotonic time onto a simulated UTC timeline.
///
/// `time_scale` simulated seconds pass per real second. Because it reads
/// [`tokio::time::Instant`], paused-clock tests advance it deterministically.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    origin_wall: DateTime<Utc>,
    origin: Instant,
    time_scale: f64,
}

impl SimClock {
    pub fn new(origin_wall: DateTime<Utc>, time_scale: f64) -> Self {
        Self {
            origin_wall,
            origin: Instant::now(),
            time_scale: if time_scale.is_finite() && time_scale > 0.0 {
                time_scale
            } else {
                1.0
            },
        }
    }

    /// Real-time clock starting at the current wall-clock time.
    pub fn realtime() -> Self {
        Self::new(Utc::now(), 1.0)
    }

    pub fn origin(&self) -> DateTime<Utc> {
        self.origin_wall
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.at(Instant::now())
    }

    /// Simulated timestamp for a monotonic instant; instants before the
    /// origin map to the origin.
    pub fn at(&self, instant: Instant) -> DateTime<Utc> {
        let elapsed = instant.saturating_duration_since(self.origin);
        let simulated = elapsed.mul_f64(self.time_scale);
        chrono::Duration::from_std(simulated)
            .ok()
            .and_then(|span| self.origin_wall.checked_add_signed(span))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Real time that elapses while `simulated` passes on this clock.
    pub fn real_interval(&self, simulated: Duration) -> Duration {
        simulated.div_f64(self.time_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test(start_paused = true)]
    async fn scaled_clock_runs_faster_than_real_time() {
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = SimClock::new(origin, 60.0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(clock.now(), origin + chrono::Duration::minutes(2));
        assert_eq!(
            clock.real_interval(Duration::from_secs(60)),
            Duration::from_secs(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_scale_falls_back_to_realtime() {
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = SimClock::new(origin, 0.0);
        assert_eq!(clock.time_scale(), 1.0);
        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(clock.now(), origin + chrono::Duration::milliseconds(1_500));
    }
}
