//! Circuit breaker gating a query's fetcher.
//!
//! A three-state machine (`Closed` / `Open` / `HalfOpen`) with an exponential-backoff helper
//! and a consecutive-failure counter, named in `QueryOptions.circuitBreaker` so multiple
//! queries can share one breaker.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation — requests pass through.
    Closed,
    /// Too many failures — requests fail fast.
    Open,
    /// Testing recovery — a limited request is allowed through.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long to stay open before probing with a half-open request.
    pub timeout: Duration,
    /// How long a half-open probe window lasts before reopening on inactivity.
    pub half_open_test_period: Duration,
    /// Base delay for [`CircuitBreaker::calculate_backoff`].
    pub base_delay: Duration,
    /// Cap on the exponential backoff delay.
    pub max_delay: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        use crate::constants::defaults;
        Self {
            failure_threshold: defaults::CIRCUIT_FAILURE_THRESHOLD,
            timeout: defaults::CIRCUIT_OPEN_TIMEOUT,
            half_open_test_period: defaults::CIRCUIT_HALF_OPEN_TEST_PERIOD,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1600),
        }
    }
}

/// Point-in-time circuit breaker statistics.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub consecutive_failures: u32,
    pub circuit_opened_count: u32,
}

struct State {
    circuit: CircuitState,
    stats: CircuitBreakerStats,
    last_failure_time: Option<Instant>,
    half_open_started: Option<Instant>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            circuit: CircuitState::Closed,
            stats: CircuitBreakerStats::default(),
            last_failure_time: None,
            half_open_started: None,
        }
    }
}

/// Gates a fetcher behind a closed/open/half-open state machine.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<State>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        info!(
            failure_threshold = config.failure_threshold,
            timeout_ms = config.timeout.as_millis() as u64,
            "initializing circuit breaker"
        );
        Self {
            config,
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Run `operation` if the circuit allows it; otherwise fail fast with
    /// [`Error::CircuitOpen`].
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.should_allow_request().await {
            let mut state = self.state.write().await;
            state.stats.rejected_calls += 1;
            debug!("circuit breaker rejecting request: circuit is open");
            return Err(Error::CircuitOpen);
        }

        {
            let mut state = self.state.write().await;
            state.stats.total_calls += 1;
        }

        let result = operation().await;
        self.on_result(&result).await;
        result
    }

    async fn should_allow_request(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.write().await;
        match state.circuit {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(last_failure) = state.last_failure_time {
                    if now.duration_since(last_failure) >= self.config.timeout {
                        info!("circuit breaker transitioning to half-open");
                        state.circuit = CircuitState::HalfOpen;
                        state.half_open_started = Some(now);
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => true,
        }
    }

    async fn on_result<T>(&self, result: &Result<T>) {
        let mut state = self.state.write().await;
        match result {
            Ok(_) => {
                state.stats.successful_calls += 1;
                self.on_success(&mut state);
            }
            Err(e) => {
                if e.is_recoverable() {
                    state.stats.failed_calls += 1;
                    self.on_failure(&mut state);
                } else {
                    debug!(error = %e, "non-recoverable error, not affecting circuit state");
                }
            }
        }
    }

    fn on_success(&self, state: &mut State) {
        match state.circuit {
            CircuitState::HalfOpen => {
                info!("circuit breaker closing after successful recovery probe");
                state.circuit = CircuitState::Closed;
                state.stats.consecutive_failures = 0;
                state.last_failure_time = None;
                state.half_open_started = None;
            }
            CircuitState::Closed => {
                state.stats.consecutive_failures = 0;
            }
            CircuitState::Open => {
                warn!("unexpected success while circuit is open");
            }
        }
    }

    fn on_failure(&self, state: &mut State) {
        state.stats.consecutive_failures += 1;
        state.last_failure_time = Some(Instant::now());

        debug!(
            consecutive_failures = state.stats.consecutive_failures,
            threshold = self.config.failure_threshold,
            "circuit breaker recorded failure"
        );

        match state.circuit {
            CircuitState::Closed => {
                if state.stats.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        consecutive_failures = state.stats.consecutive_failures,
                        "circuit breaker opening"
                    );
                    state.circuit = CircuitState::Open;
                    state.stats.circuit_opened_count += 1;
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker reopening after failure during recovery probe");
                state.circuit = CircuitState::Open;
                state.stats.circuit_opened_count += 1;
                state.half_open_started = None;
            }
            CircuitState::Open => {}
        }
    }

    #[must_use]
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.circuit
    }

    #[must_use]
    pub async fn stats(&self) -> CircuitBreakerStats {
        self.state.read().await.stats.clone()
    }

    /// Exponential backoff for attempt `n` (0-based): `base_delay * 2^n`, capped at
    /// `max_delay`.
    #[must_use]
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let delay_ms = self.config.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
        std::cmp::min(Duration::from_millis(delay_ms), self.config.max_delay)
    }

    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        info!("circuit breaker reset to closed state");
        state.circuit = CircuitState::Closed;
        state.stats.consecutive_failures = 0;
        state.last_failure_time = None;
        state.half_open_started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::default()
        });

        for _ in 0..2 {
            let _ = cb
                .call(|| async { Err::<(), _>(Error::fetcher(DummyError)) })
                .await;
        }

        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_rejects_fast() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        });
        let _ = cb
            .call(|| async { Err::<(), _>(Error::fetcher(DummyError)) })
            .await;
        assert_eq!(cb.state().await, CircuitState::Open);

        let result = cb.call(|| async { Ok::<_, Error>(()) }).await;
        assert!(matches!(result, Err(Error::CircuitOpen)));
    }

    #[tokio::test]
    async fn half_open_probe_closes_circuit_on_success() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            timeout: Duration::from_millis(10),
            ..CircuitBreakerConfig::default()
        });
        let _ = cb
            .call(|| async { Err::<(), _>(Error::fetcher(DummyError)) })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = cb.call(|| async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn non_recoverable_error_does_not_open_circuit() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        });
        let _ = cb
            .call(|| async { Err::<(), _>(Error::Cancelled) })
            .await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.calculate_backoff(0), Duration::from_millis(100));
        assert_eq!(cb.calculate_backoff(1), Duration::from_millis(200));
        assert_eq!(cb.calculate_backoff(4), Duration::from_millis(1600));
        assert_eq!(cb.calculate_backoff(10), Duration::from_millis(1600));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("dummy")]
    struct DummyError;
}
