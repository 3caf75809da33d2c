//! Circuit breaker for metadata and leader operations

use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
const DEFAULT_COOL_OFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

/// Three-state fault gate wrapping the fallible cluster operations
/// (metadata refresh, leader lookup, partitioner consistency reads).
///
/// Closed passes requests through; `failure_threshold` consecutive failures
/// open the gate; after `cool_off` a single probe is let through
/// (half-open), and `success_threshold` successes close the gate again.
/// Each pipeline task owns its breaker outright, so no synchronization is
/// needed.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    cool_off: Duration,
    state: State,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAILURE_THRESHOLD,
            DEFAULT_SUCCESS_THRESHOLD,
            DEFAULT_COOL_OFF,
        )
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, cool_off: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            cool_off,
            state: State::Closed,
            failures: 0,
            successes: 0,
            opened_at: None,
        }
    }

    /// Whether a request may proceed right now. Transitions open → half-open
    /// once the cool-off has elapsed.
    pub fn allow(&mut self) -> bool {
        match self.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let cooled = self
                    .opened_at
                    .map(|t| t.elapsed() >= self.cool_off)
                    .unwrap_or(true);
                if cooled {
                    debug!("circuit breaker half-open after cool-off");
                    self.state = State::HalfOpen;
                    self.successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        if self.state == State::HalfOpen {
            self.successes += 1;
            if self.successes >= self.success_threshold {
                debug!("circuit breaker closed after probe success");
                self.state = State::Closed;
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
        self.opened_at = Some(Instant::now());
        if self.state == State::HalfOpen || self.failures >= self.failure_threshold {
            if self.state != State::Open {
                warn!("circuit breaker opened after {} failures", self.failures);
            }
            self.state = State::Open;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stays_closed_below_threshold() {
        let mut breaker = CircuitBreaker::default();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow());
    }

    #[test]
    fn test_opens_at_threshold() {
        let mut breaker = CircuitBreaker::default();
        for _ in 0..3 {
            assert!(breaker.allow());
            breaker.record_failure();
        }
        assert!(!breaker.allow());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut breaker = CircuitBreaker::default();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow());
    }

    #[test]
    fn test_half_open_after_cool_off_then_closes() {
        let mut breaker = CircuitBreaker::new(1, 1, Duration::from_millis(10));
        breaker.record_failure();
        assert!(!breaker.allow());

        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.allow());
        breaker.record_success();
        assert!(breaker.allow());
        assert_eq!(breaker.state, State::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(1, 1, Duration::from_secs(10));
        breaker.record_failure();
        // Force the probe without waiting out the cool-off.
        breaker.state = State::HalfOpen;
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(!breaker.allow());
    }
}
