//! Circuit breaker for chat workers
//!
//! After `threshold` consecutive failures the breaker opens and calls fail fast
//! until the cool-down has passed; then one trial call is let through.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    /// Cool-down elapsed, next call is a trial
    HalfOpen,
}

/// Per-worker failure counter with a cool-down
///
/// ```
/// use ensemble_agent::CircuitBreaker;
///
/// let cb = CircuitBreaker::default();
/// for _ in 0..3 {
///     cb.record_failure();
/// }
/// assert!(!cb.can_execute());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    // Millis since `origin` of the latest failure
    last_failure: AtomicU64,
    origin: Instant,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            last_failure: AtomicU64::new(0),
            origin: Instant::now(),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn elapsed_since_failure(&self) -> u64 {
        self.now_millis()
            .saturating_sub(self.last_failure.load(Ordering::Relaxed))
    }

    pub fn state(&self) -> CircuitState {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            CircuitState::Closed
        } else if self.elapsed_since_failure() >= self.cooldown.as_millis() as u64 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.last_failure.store(self.now_millis(), Ordering::Relaxed);
    }

    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Time left before a trial call is allowed, zero unless open
    pub fn time_until_retry(&self) -> Duration {
        match self.state() {
            CircuitState::Open => {
                let left = (self.cooldown.as_millis() as u64)
                    .saturating_sub(self.elapsed_since_failure());
                Duration::from_millis(left)
            }
            CircuitState::Closed | CircuitState::HalfOpen => Duration::ZERO,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.time_until_retry(), Duration::ZERO);
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure();
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
        assert!(cb.time_until_retry() > Duration::ZERO);
    }

    #[test]
    fn test_success_closes() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(50));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        sleep(Duration::from_millis(80));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let cb = CircuitBreaker::new(0, Duration::from_secs(1));
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
