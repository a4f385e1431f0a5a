//! Sliding-window transfer-rate estimation.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(2);

/// Bytes-per-second estimate over roughly the last two seconds.
#[derive(Debug)]
pub struct SpeedWindow {
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedWindow {
    /// An empty window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: VecDeque::new(),
        }
    }

    /// Record the cumulative byte count and return the current estimate.
    pub fn observe(&mut self, total_bytes: u64) -> u64 {
        let now = Instant::now();
        self.samples.push_back((now, total_bytes));
        while let Some(&(at, _)) = self.samples.front() {
            if now.duration_since(at) > WINDOW && self.samples.len() > 1 {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let (&(oldest_at, oldest_bytes), &(newest_at, newest_bytes)) =
            match (self.samples.front(), self.samples.back()) {
                (Some(front), Some(back)) => (front, back),
                _ => return 0,
            };
        let elapsed = newest_at.duration_since(oldest_at);
        if elapsed.is_zero() {
            return 0;
        }
        let moved = newest_bytes.saturating_sub(oldest_bytes);
        let bps = (moved as f64 / elapsed.as_secs_f64()).round();
        if bps.is_finite() && bps >= 0.0 {
            bps as u64
        } else {
            0
        }
    }
}

impl Default for SpeedWindow {
    fn default() -> Self {
        Self::new()
    }
}
