//! Exponential backoff with a ceiling, reset on success.

use crate::{CoreError, Result};
use std::time::Duration;

/// Backoff state owned by a single polling loop.
///
/// `initial <= current <= maximum` holds after construction and after every
/// operation.
#[derive(Debug, Clone)]
pub struct BackoffMediator {
    current: Duration,
    initial: Duration,
    maximum: Duration,
}

impl BackoffMediator {
    pub fn new(initial: Duration, maximum: Duration) -> Result<Self> {
        if initial.is_zero() || initial > maximum {
            return Err(CoreError::InvalidBackoff { initial, maximum });
        }

        Ok(BackoffMediator {
            current: initial,
            initial,
            maximum,
        })
    }

    pub fn from_secs(initial_secs: u64, maximum_secs: u64) -> Result<Self> {
        Self::new(
            Duration::from_secs(initial_secs),
            Duration::from_secs(maximum_secs),
        )
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn maximum(&self) -> Duration {
        self.maximum
    }

    /// Called after every successful unit of work
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Called after every failed unit of work
    pub fn increment(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.maximum);
    }

    /// Sleep for the current interval
    pub async fn wait(&self) {
        tokio::time::sleep(self.current).await;
    }
}

impl Default for BackoffMediator {
    fn default() -> Self {
        BackoffMediator {
            current: Duration::from_secs(crate::DEFAULT_INITIAL_BACKOFF_SECS),
            initial: Duration::from_secs(crate::DEFAULT_INITIAL_BACKOFF_SECS),
            maximum: Duration::from_secs(crate::DEFAULT_MAXIMUM_BACKOFF_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_policy() {
        let mediator = BackoffMediator::default();
        assert_eq!(mediator.current(), Duration::from_secs(1));
        assert_eq!(mediator.maximum(), Duration::from_secs(300));
    }

    #[test]
    fn test_doubling_sequence() {
        let mut mediator = BackoffMediator::from_secs(1, 300).unwrap();

        let mut seen = Vec::new();
        for _ in 0..10 {
            mediator.increment();
            seen.push(mediator.current().as_secs());
        }

        // 1 -> 2 -> 4 ... capped at 300
        assert_eq!(seen, vec![2, 4, 8, 16, 32, 64, 128, 256, 300, 300]);
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let mut mediator = BackoffMediator::from_secs(3, 100).unwrap();
        mediator.increment();
        mediator.increment();
        assert_eq!(mediator.current(), Duration::from_secs(12));

        mediator.reset();
        assert_eq!(mediator.current(), Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        assert!(BackoffMediator::from_secs(0, 10).is_err());
        assert!(BackoffMediator::from_secs(20, 10).is_err());
        assert!(BackoffMediator::from_secs(10, 10).is_ok());
    }

    #[tokio::test]
    async fn test_wait_sleeps_current_interval() {
        let mediator =
            BackoffMediator::new(Duration::from_millis(20), Duration::from_millis(40)).unwrap();

        let start = std::time::Instant::now();
        mediator.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_maximum(
            initial_ms in 1u64..10_000,
            extra_ms in 0u64..1_000_000,
            steps in 0usize..64,
        ) {
            let initial = Duration::from_millis(initial_ms);
            let maximum = Duration::from_millis(initial_ms + extra_ms);
            let mut mediator = BackoffMediator::new(initial, maximum).unwrap();

            for _ in 0..steps {
                let before = mediator.current();
                mediator.increment();
                prop_assert_eq!(mediator.current(), (before * 2).min(maximum));
                prop_assert!(mediator.current() >= before);
                prop_assert!(mediator.current() <= maximum);
                prop_assert!(mediator.current() >= initial);
            }

            mediator.reset();
            prop_assert_eq!(mediator.current(), initial);
        }
    }
}
