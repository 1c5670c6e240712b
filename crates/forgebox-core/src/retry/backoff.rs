//! Exponential backoff calculator for retry delays.
//!
//! The delay before retry `n` (after the `n`th failed attempt) is
//! `unit * 2^(n-1)`, capped at `max_delay` when one is set.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    unit: Duration,
    max_delay: Option<Duration>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Some(Duration::from_secs(30)))
    }
}

impl Backoff {
    pub fn new(unit: Duration, max_delay: Option<Duration>) -> Self {
        Self { unit, max_delay }
    }

    pub fn unit(&self) -> Duration {
        self.unit
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = 2u32
            .checked_pow(exponent)
            .and_then(|factor| self.unit.checked_mul(factor))
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let b = Backoff::new(Duration::from_secs(1), None);
        assert_eq!(b.delay_for(1), Duration::from_secs(1));
        assert_eq!(b.delay_for(2), Duration::from_secs(2));
        assert_eq!(b.delay_for(3), Duration::from_secs(4));
        assert_eq!(b.delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn test_max_delay_cap() {
        let b = Backoff::new(Duration::from_secs(2), Some(Duration::from_secs(10)));
        assert_eq!(b.delay_for(3), Duration::from_secs(8));
        // 2 * 8 = 16, capped at 10
        assert_eq!(b.delay_for(4), Duration::from_secs(10));
        assert_eq!(b.delay_for(30), Duration::from_secs(10));
    }

    #[test]
    fn test_overflow_saturates() {
        let b = Backoff::new(Duration::from_secs(1), None);
        assert_eq!(b.delay_for(64), Duration::MAX);
        assert_eq!(
            Backoff::new(Duration::from_secs(1), Some(Duration::from_secs(5))).delay_for(u32::MAX),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_attempt_zero_behaves_like_first() {
        let b = Backoff::default();
        assert_eq!(b.delay_for(0), b.delay_for(1));
        assert_eq!(b.unit(), Duration::from_secs(1));
        assert_eq!(b.max_delay(), Some(Duration::from_secs(30)));
    }
}
