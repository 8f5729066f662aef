//! ---
//! fab_section: "11-simulation"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Shift calendar producing the demand factor for physical models."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

fn default_shifts() -> Vec<ShiftWindow> {
    vec![
        ShiftWindow {
            start_hour: 6,
            end_hour: 14,
        },
        ShiftWindow {
            start_hour: 14,
            end_hour: 22,
        },
    ]
}

fn default_weekend_factor() -> f64 {
    0.3
}

fn default_off_shift_factor() -> f64 {
    0.05
}

/// Half-open production window `[start_hour, end_hour)` in local hours.
///
/// A window whose end is not after its start wraps past midnight, e.g. a
/// night shift `22 → 6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ShiftWindow {
    pub fn contains(&self, hour: f64) -> bool {
        let start = f64::from(self.start_hour);
        let end = f64::from(self.end_hour);
        if self.start_hour < self.end_hour {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

/// Maps wall-clock time to a workload intensity in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftCalendar {
    #[serde(default = "default_shifts")]
    pub shifts: Vec<ShiftWindow>,
    #[serde(default = "default_weekend_factor")]
    pub weekend_factor: f64,
    #[serde(default = "default_off_shift_factor")]
    pub off_shift_factor: f64,
    /// Offset applied to UTC timestamps before reading hour and weekday.
    #[serde(default)]
    pub utc_offset_hours: i32,
}

impl Default for ShiftCalendar {
    fn default() -> Self {
        Self {
            shifts: default_shifts(),
            weekend_factor: default_weekend_factor(),
            off_shift_factor: default_off_shift_factor(),
            utc_offset_hours: 0,
        }
    }
}

impl ShiftCalendar {
    /// Calendar that reports the same demand around the clock.
    pub fn constant(factor: f64) -> Self {
        Self {
            shifts: Vec::new(),
            weekend_factor: factor,
            off_shift_factor: factor,
            utc_offset_hours: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for window in &self.shifts {
            if window.start_hour > 24 || window.end_hour > 24 {
                return Err(SimError::config(format!(
                    "shift window {}-{} exceeds 24 hours",
                    window.start_hour, window.end_hour
                )));
            }
            if window.start_hour == window.end_hour {
                return Err(SimError::config(format!(
                    "shift window {}-{} is empty",
                    window.start_hour, window.end_hour
                )));
            }
        }
        for (label, factor) in [
            ("weekend_factor", self.weekend_factor),
            ("off_shift_factor", self.off_shift_factor),
        ] {
            if !(0.0..=1.0).contains(&factor) {
                return Err(SimError::config(format!(
                    "{label} must be within [0, 1], got {factor}"
                )));
            }
        }
        if !(-14..=14).contains(&self.utc_offset_hours) {
            return Err(SimError::config(format!(
                "utc_offset_hours {} out of range",
                self.utc_offset_hours
            )));
        }
        Ok(())
    }

    /// Demand factor for the given instant.
    ///
    /// Full demand inside a weekday shift, `weekend_factor` inside a weekend
    /// shift and `off_shift_factor` otherwise.
    pub fn demand_factor(&self, at: DateTime<Utc>) -> f64 {
        let local = self.local_time(at);
        let hour = f64::from(local.hour())
            + f64::from(local.minute()) / 60.0
            + f64::from(local.second()) / 3600.0;
        let in_shift = self.shifts.iter().any(|window| window.contains(hour));
        let factor = if !in_shift {
            self.off_shift_factor
        } else if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            self.weekend_factor
        } else {
            1.0
        };
        factor.clamp(0.0, 1.0)
    }

    /// Plant-local calendar day of `at`. Daily events roll over at local
    /// midnight, not at UTC midnight.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local_time(at).date_naive()
    }

    fn local_time(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at + ChronoDuration::hours(i64::from(self.utc_offset_hours))
    }
}
