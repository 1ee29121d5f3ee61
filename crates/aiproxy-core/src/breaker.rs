use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub reset_timeout: Duration,
    pub half_open_max_tries: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_tries: 3,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    half_open_tries: u32,
    last_failure_time: Option<Instant>,
    last_success_time: Option<Instant>,
}

/// Standard three-state breaker: Closed→Open at `max_failures`, Open→HalfOpen
/// after `reset_timeout`, HalfOpen→Closed after `half_open_max_tries`
/// successes, HalfOpen→Open on any failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_tries: 0,
                last_failure_time: None,
                last_success_time: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.roll_state(&mut inner);
        inner.state
    }

    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.roll_state(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.half_open_tries < self.config.half_open_max_tries {
                    inner.half_open_tries += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.roll_state(&mut inner);
        inner.last_success_time = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
                inner.success_count += 1;
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_max_tries {
                    tracing::info!("circuit breaker closed after successful probes");
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.half_open_tries = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.roll_state(&mut inner);
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.max_failures {
                    tracing::warn!(
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!("circuit breaker reopened by a half-open failure");
                inner.state = BreakerState::Open;
                inner.success_count = 0;
                inner.half_open_tries = 0;
            }
            BreakerState::Open => {}
        }
    }

    fn roll_state(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open
            && let Some(last_failure) = inner.last_failure_time
            && last_failure.elapsed() >= self.config.reset_timeout
        {
            inner.state = BreakerState::HalfOpen;
            inner.success_count = 0;
            inner.half_open_tries = 0;
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            max_failures: 5,
            reset_timeout: Duration::from_millis(50),
            half_open_max_tries: 3,
        })
    }

    #[test]
    fn opens_after_max_failures_and_fails_fast() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            assert!(breaker.can_execute());
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn half_opens_after_the_reset_timeout_and_closes_on_successes() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.can_execute());

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        for _ in 0..3 {
            assert!(breaker.can_execute());
            breaker.record_success();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn half_open_tries_are_bounded() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.can_execute());
        assert!(breaker.can_execute());
        assert!(breaker.can_execute());
        assert!(!breaker.can_execute());
    }
}
