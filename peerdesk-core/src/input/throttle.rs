//! Pointer-move rate limiting.
//!
//! Moves arriving within the window after the last emitted move are
//! dropped, not queued: only the position at emission time matters.

use std::time::Duration;

use tokio::time::Instant;

/// Default minimum spacing between emitted moves (16 ms, about 60 Hz).
pub const DEFAULT_MOVE_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone)]
pub struct MoveThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl Default for MoveThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MOVE_INTERVAL)
    }
}

impl MoveThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    /// Whether a move observed at `now` should be sent.
    pub fn admit(&mut self, now: Instant) -> bool {
        let due = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_emit = Some(now);
        }
        due
    }

    /// Forget the last emission, e.g. after remote control is re-enabled.
    pub fn reset(&mut self) {
        self.last_emit = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_bounded_by_window() {
        let mut throttle = MoveThrottle::default();
        let start = Instant::now();

        // 1000 moves spread evenly over 100 ms.
        let emitted = (0..1000u64)
            .filter(|i| throttle.admit(start + Duration::from_micros(i * 100)))
            .count();

        // Emissions at 0, 16, 32, 48, 64, 80 and 96 ms.
        assert_eq!(emitted, 7);
    }

    #[test]
    fn first_move_always_passes() {
        let mut throttle = MoveThrottle::default();
        assert!(throttle.admit(Instant::now()));
    }

    #[test]
    fn reset_reopens_window() {
        let mut throttle = MoveThrottle::new(Duration::from_secs(10));
        let now = Instant::now();
        assert!(throttle.admit(now));
        assert!(!throttle.admit(now + Duration::from_millis(1)));
        throttle.reset();
        assert!(throttle.admit(now + Duration::from_millis(2)));
    }
}
