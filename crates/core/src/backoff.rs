// crates/core/src/backoff.rs
//! Reconnect backoff for the push watcher.

use std::time::Duration;

/// Delay before reconnect attempt `attempt` (1-based):
/// `min(base * 2^(attempt - 1), max)`.
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(max)
}

/// Attempt counter with a hard cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// Count another attempt and return its delay, or `None` once the cap
    /// has been reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(reconnect_delay(self.attempt, self.base, self.max_delay))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(1000);
    const MAX: Duration = Duration::from_millis(30_000);

    #[test]
    fn test_delay_sequence_doubles_then_caps() {
        let delays: Vec<u128> = (1..=8)
            .map(|attempt| reconnect_delay(attempt, BASE, MAX).as_millis())
            .collect();
        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
        );
    }

    #[test]
    fn test_delay_does_not_overflow_on_huge_attempts() {
        assert_eq!(reconnect_delay(u32::MAX, BASE, MAX), MAX);
        assert_eq!(reconnect_delay(64, BASE, MAX), MAX);
    }

    #[test]
    fn test_backoff_exhausts_after_cap() {
        let mut backoff = Backoff::new(BASE, MAX, 3);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(4000)));
        assert_eq!(backoff.attempt(), 3);
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = Backoff::new(BASE, MAX, 5);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(BASE));
    }
}
