//! Progress snapshots and the throttle that decides when to report them

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default minimum gap between two non-final progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(1000);

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Bytes transferred against the expected total. `total <= 0` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: i64,
    pub current: i64,
}

impl Progress {
    pub fn new(total: i64, current: i64) -> Self {
        Self { total, current }
    }

    pub fn is_indeterminate(&self) -> bool {
        self.total <= 0
    }

    /// Whole percent, truncated. Zero when the total is unknown.
    pub fn percentage(&self) -> u32 {
        if self.is_indeterminate() || self.current <= 0 {
            return 0;
        }
        (self.current as i128 * 100 / self.total as i128).clamp(0, u32::MAX as i128) as u32
    }

    pub fn percentage_string(&self) -> String {
        format!("{}%", self.percentage())
    }

    /// `"done/total"` with auto-scaled units, or just `"done"` when the total
    /// is unknown.
    pub fn length_string(&self) -> String {
        if self.is_indeterminate() {
            format_length(self.current)
        } else {
            format!("{}/{}", format_length(self.current), format_length(self.total))
        }
    }
}

/// Human readable byte count: `512B`, `1.5KB`, `9.77MB`.
pub fn format_length(bytes: i64) -> String {
    let mut value = bytes.max(0) as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", text, UNITS[unit])
}

/// Rate limiter for progress callbacks.
///
/// An update goes out when it is final or the interval has passed since the
/// last attempt, and only if it carries a new value.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_attempt: Option<Instant>,
    last_reported: Option<Progress>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: None,
            last_reported: None,
        }
    }

    pub fn should_emit(&mut self, progress: Progress, is_final: bool, now: Instant) -> bool {
        if !is_final {
            if let Some(last) = self.last_attempt {
                if now.saturating_duration_since(last) < self.interval {
                    return false;
                }
            }
        }
        self.last_attempt = Some(now);

        let duplicate = match self.last_reported {
            // a final report still goes out if only the total changed
            Some(last) if is_final => last == progress,
            Some(last) => last.current == progress.current,
            None => false,
        };
        if duplicate {
            return false;
        }
        self.last_reported = Some(progress);
        true
    }

    pub fn last_reported(&self) -> Option<Progress> {
        self.last_reported
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_truncates() {
        assert_eq!(Progress::new(10_000, 4_000).percentage(), 40);
        assert_eq!(Progress::new(3, 2).percentage(), 66);
        assert_eq!(Progress::new(10_000, 10_000).percentage(), 100);
    }

    #[test]
    fn percentage_of_unknown_total_is_zero() {
        let progress = Progress::new(-1, 5_000);
        assert!(progress.is_indeterminate());
        assert_eq!(progress.percentage(), 0);
        assert!(Progress::new(0, 10).is_indeterminate());
    }

    #[test]
    fn percentage_never_negative() {
        assert_eq!(Progress::new(100, -5).percentage(), 0);
    }

    #[test]
    fn length_string_scales_units() {
        assert_eq!(format_length(512), "512B");
        assert_eq!(format_length(1536), "1.5KB");
        assert_eq!(format_length(1024 * 1024), "1MB");
        assert_eq!(format_length(10_000), "9.77KB");
        assert_eq!(Progress::new(2048, 1024).length_string(), "1KB/2KB");
        assert_eq!(Progress::new(-1, 100).length_string(), "100B");
    }

    #[test]
    fn throttle_respects_interval() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_millis(1000));
        assert!(throttle.should_emit(Progress::new(100, 10), false, start));
        assert!(!throttle.should_emit(
            Progress::new(100, 20),
            false,
            start + Duration::from_millis(500)
        ));
        assert!(throttle.should_emit(
            Progress::new(100, 30),
            false,
            start + Duration::from_millis(1600)
        ));
    }

    #[test]
    fn throttle_suppresses_duplicates() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_millis(1000));
        assert!(throttle.should_emit(Progress::new(100, 10), false, start));
        assert!(!throttle.should_emit(
            Progress::new(100, 10),
            false,
            start + Duration::from_secs(5)
        ));
    }

    #[test]
    fn final_update_bypasses_interval() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_millis(1000));
        assert!(throttle.should_emit(Progress::new(100, 10), false, start));
        assert!(throttle.should_emit(
            Progress::new(100, 100),
            true,
            start + Duration::from_millis(1)
        ));
        assert_eq!(throttle.last_reported(), Some(Progress::new(100, 100)));
    }

    #[test]
    fn final_update_with_resolved_total_is_reported() {
        let start = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_millis(1000));
        assert!(throttle.should_emit(Progress::new(-1, 500), false, start));
        assert!(throttle.should_emit(Progress::new(500, 500), true, start));
        assert!(!throttle.should_emit(Progress::new(500, 500), true, start));
    }
}
