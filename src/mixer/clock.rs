//! Tick deadlines anchored to a fixed start instant
//!
//! Each deadline is computed from the start time and the tick index rather
//! than from the previous wake-up, so scheduling jitter never accumulates.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TickClock {
    start: Instant,
    fps: u32,
    index: u64,
}

impl TickClock {
    pub fn new(start: Instant, fps: u32) -> Self {
        Self {
            start,
            fps: fps.max(1),
            index: 0,
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    /// Ticks emitted so far
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.fps as u64)
    }

    /// Deadline of tick `index`, exact to the nanosecond.
    pub fn deadline(&self, index: u64) -> Instant {
        let nanos = index as u128 * 1_000_000_000 / self.fps as u128;
        self.start + Duration::from_nanos(nanos as u64)
    }

    /// Count one emitted tick and return when the next one is due.
    pub fn advance(&mut self) -> Instant {
        self.index += 1;
        self.deadline(self.index)
    }

    /// How far `now` is past the next deadline; zero when on time.
    pub fn lag(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.deadline(self.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlines_do_not_drift() {
        let start = Instant::now();
        let mut clock = TickClock::new(start, 30);
        let mut last = start;
        for _ in 0..3000 {
            last = clock.advance();
        }
        // 3000 ticks at 30 fps is exactly 100 s even though 1/30 s is not
        assert_eq!(last - start, Duration::from_secs(100));
        assert_eq!(clock.index(), 3000);
    }

    #[test]
    fn test_lag_is_never_negative() {
        let start = Instant::now();
        let mut clock = TickClock::new(start, 20);
        clock.advance();
        assert_eq!(clock.lag(start), Duration::ZERO);
        assert_eq!(
            clock.lag(start + Duration::from_millis(80)),
            Duration::from_millis(30)
        );
        assert_eq!(clock.period(), Duration::from_millis(50));
    }
}
