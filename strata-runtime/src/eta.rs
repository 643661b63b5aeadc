//! Backfill throughput estimation
//!
//! Smooths per-row batch cost with an exponentially weighted moving average
//! so progress records can carry a remaining-time estimate.

use chrono::Duration;

#[derive(Debug, Clone)]
pub struct EtaCalculator {
    /// Smoothing factor in `0.01..=1.0`; higher favors recent batches
    alpha: f64,
    /// Smoothed cost of one row in milliseconds
    ms_per_row: f64,
    batches: u32,
}

impl Default for EtaCalculator {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl EtaCalculator {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            ms_per_row: 0.0,
            batches: 0,
        }
    }

    /// Fold in one completed batch; empty batches are ignored
    pub fn record_batch(&mut self, rows: usize, elapsed_ms: u64) {
        if rows == 0 {
            return;
        }
        let cost = elapsed_ms as f64 / rows as f64;
        self.ms_per_row = if self.batches == 0 {
            cost
        } else {
            self.alpha * cost + (1.0 - self.alpha) * self.ms_per_row
        };
        self.batches += 1;
    }

    pub fn ms_per_row(&self) -> f64 {
        self.ms_per_row
    }

    pub fn batches(&self) -> u32 {
        self.batches
    }

    /// `None` until at least one batch has been recorded
    pub fn estimate_remaining(&self, remaining_rows: u64) -> Option<Duration> {
        if self.batches == 0 {
            return None;
        }
        let ms = self.ms_per_row * remaining_rows as f64;
        Some(Duration::milliseconds(ms.round() as i64))
    }

    pub fn rows_per_second(&self) -> Option<f64> {
        (self.batches > 0 && self.ms_per_row > 0.0).then(|| 1000.0 / self.ms_per_row)
    }
}

/// Format a duration for log output
pub fn format_duration_human(duration: Duration) -> String {
    let total_secs = duration.num_seconds();

    if total_secs < 60 {
        format!("{}s", total_secs)
    } else if total_secs < 3600 {
        let (mins, secs) = (total_secs / 60, total_secs % 60);
        if secs == 0 {
            format!("{}m", mins)
        } else {
            format!("{}m {}s", mins, secs)
        }
    } else {
        let (hours, mins) = (total_secs / 3600, (total_secs % 3600) / 60);
        if mins == 0 {
            format!("{}h", hours)
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}
