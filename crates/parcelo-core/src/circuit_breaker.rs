//! Fault isolation for carrier adapter calls.
//!
//! Two layers: a thread-safe [`CircuitBreaker`] state machine shared per
//! adapter instance, and a [`FaultIsolator`] bounded-retry wrapper scoped to
//! one logical call. The isolator preserves the contract: exactly
//! `max_attempts` attempts for an always-failing operation, then
//! `service_unavailable`; one success resets the failure count.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::carrier::CarrierError;
use crate::retry::Backoff;

/// Runtime circuit state for carrier upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Thread-safe circuit breaker for carrier network requests.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    pub fn allow_request(&self) -> bool {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let can_probe = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.config.open_timeout)
                    .unwrap_or(false);

                if can_probe {
                    inner.state = CircuitState::HalfOpen;
                    inner.opened_at = None;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        if inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.consecutive_failures
    }
}

/// Retry budget for one logical call through the isolator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultIsolatorConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for FaultIsolatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed {
                delay: Duration::from_millis(500),
            },
        }
    }
}

/// Bounded-retry wrapper around one attempt of a carrier operation.
///
/// Retries only retryable failures; carrier rejections, unknown tracking
/// numbers and unsupported operations propagate immediately without
/// consuming the attempt budget.
#[derive(Debug, Default)]
pub struct FaultIsolator {
    config: FaultIsolatorConfig,
    breaker: CircuitBreaker,
}

impl FaultIsolator {
    pub fn new(config: FaultIsolatorConfig) -> Self {
        Self {
            config,
            breaker: CircuitBreaker::default(),
        }
    }

    pub fn with_breaker(config: FaultIsolatorConfig, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breaker: CircuitBreaker::new(breaker_config),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Executes `operation` with up to `max_attempts` attempts, sleeping the
    /// configured backoff between attempts. Exhausting the budget yields
    /// `service_unavailable`.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, CarrierError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CarrierError>>,
    {
        if !self.breaker.allow_request() {
            return Err(CarrierError::service_unavailable(
                "circuit breaker is open; failing fast without contacting carrier",
            ));
        }

        let mut last_message = String::new();

        for attempt in 0..self.config.max_attempts {
            match operation().await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(error) if !error.retryable() => {
                    return Err(error);
                }
                Err(error) => {
                    self.breaker.record_failure();
                    last_message = error.message().to_owned();

                    let remaining = self.config.max_attempts - attempt - 1;
                    if remaining > 0 {
                        tokio::time::sleep(self.config.backoff.delay(attempt)).await;
                    }
                }
            }
        }

        Err(CarrierError::service_unavailable(format!(
            "carrier unavailable after {} attempts: {last_message}",
            self.config.max_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::CarrierErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            open_timeout: Duration::from_millis(10),
        });

        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn transitions_to_half_open_after_timeout_then_closes_on_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(1),
        });

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(2));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    fn isolator(max_attempts: u32) -> FaultIsolator {
        FaultIsolator::with_breaker(
            FaultIsolatorConfig {
                max_attempts,
                backoff: Backoff::Fixed {
                    delay: Duration::ZERO,
                },
            },
            CircuitBreakerConfig {
                failure_threshold: u32::MAX,
                open_timeout: Duration::from_secs(30),
            },
        )
    }

    #[tokio::test]
    async fn succeeds_when_failures_stay_below_budget() {
        let isolator = isolator(3);
        let calls = AtomicU32::new(0);

        let result = isolator
            .execute(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(CarrierError::unavailable("connection reset"))
                    } else {
                        Ok(42_u32)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("third attempt succeeds"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(isolator.breaker().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn exhausts_budget_after_exactly_max_attempts() {
        let isolator = isolator(3);
        let calls = AtomicU32::new(0);

        let error = isolator
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CarrierError::unavailable("upstream timeout")) }
            })
            .await
            .expect_err("must exhaust retries");

        assert_eq!(error.kind(), CarrierErrorKind::ServiceUnavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_propagate_without_retry() {
        let isolator = isolator(3);
        let calls = AtomicU32::new(0);

        let error = isolator
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CarrierError::rejected("invalid postal code")) }
            })
            .await
            .expect_err("must propagate");

        assert_eq!(error.kind(), CarrierErrorKind::Rejected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast() {
        let isolator = FaultIsolator::with_breaker(
            FaultIsolatorConfig {
                max_attempts: 2,
                backoff: Backoff::Fixed {
                    delay: Duration::ZERO,
                },
            },
            CircuitBreakerConfig {
                failure_threshold: 2,
                open_timeout: Duration::from_secs(60),
            },
        );

        let _ = isolator
            .execute(|| async { Err::<(), _>(CarrierError::unavailable("down")) })
            .await;
        assert_eq!(isolator.breaker().state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let error = isolator
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, CarrierError>(1_u32) }
            })
            .await
            .expect_err("breaker must block the call");

        assert_eq!(error.kind(), CarrierErrorKind::ServiceUnavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
