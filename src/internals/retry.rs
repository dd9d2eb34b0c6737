//! Retry logic with exponential backoff and circuit breaking for provider
//! adapter calls.
//!
//! - Exponential backoff with jitter, capped by `max_delay`.
//! - Circuit breaker pattern: `failure_threshold` consecutive failures opens
//!   the circuit for `recovery_timeout` before a half-open probe.
//! - Configurable timeout: per-call `request_timeout`, overall `total_timeout`.
//!
//! Retry here operates at "one provider adapter call" granularity, not at
//! the whole-cascade granularity: the Cascade Coordinator walks the
//! provider list itself and uses one [`RetryExecutor`] per provider to
//! bound retries to that provider's own backoff budget (spec §4.3: one
//! backoff-and-retry before moving to the next provider).

use crate::error::{EngineError, EngineResult};
use crate::logging::{log_debug, log_error, log_warn};

use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Retry policy configuration for a single provider's calls.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (spec: backoff-and-retry once, so 2).
    pub max_attempts: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Maximum total time across all attempts.
    pub total_timeout: Duration,
    /// Timeout for an individual attempt.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            total_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing, blocking requests.
    Open,
    /// Testing if the provider recovered.
    HalfOpen,
}

/// Circuit breaker for provider resilience, one instance per provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreaker {
    /// Check if a request should be allowed through.
    pub fn should_allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.check_recovery_timeout(),
            CircuitState::HalfOpen => true,
        }
    }

    fn check_recovery_timeout(&mut self) -> bool {
        let Some(last_failure) = self.last_failure_time else {
            return false;
        };

        if last_failure.elapsed() >= self.recovery_timeout {
            log_debug!(
                circuit_breaker = "transitioning_to_half_open",
                recovery_timeout_seconds = self.recovery_timeout.as_secs(),
                "Circuit breaker attempting recovery"
            );
            self.state = CircuitState::HalfOpen;
            true
        } else {
            false
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                log_debug!(
                    circuit_breaker = "recovered",
                    "Circuit breaker recovered, returning to closed state"
                );
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.last_failure_time = None;
            }
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::Open => {
                self.failure_count = 0;
                self.last_failure_time = None;
            }
        }
    }

    /// Record a failed call that should count toward tripping the circuit.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Instant::now());

        if self.failure_count >= self.failure_threshold {
            if self.state != CircuitState::Open {
                log_warn!(
                    circuit_breaker = "opened",
                    failure_count = self.failure_count,
                    failure_threshold = self.failure_threshold,
                    recovery_timeout_seconds = self.recovery_timeout.as_secs(),
                    "Circuit breaker opened due to repeated failures"
                );
            }
            self.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }
}

/// Retry executor that handles exponential backoff and circuit breaking
/// for a single provider.
#[derive(Debug)]
pub struct RetryExecutor {
    pub policy: RetryPolicy,
    pub circuit_breaker: CircuitBreaker,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            circuit_breaker: CircuitBreaker::default(),
        }
    }

    /// Whether a call is currently allowed (circuit not open).
    pub fn check_circuit_breaker(&mut self) -> EngineResult<()> {
        if !self.circuit_breaker.should_allow_request() {
            return Err(EngineError::provider_unavailable(
                "unknown",
                "circuit breaker is open",
            ));
        }
        Ok(())
    }

    /// Execute a request with retry logic and circuit breaking.
    pub async fn execute<F, Fut, T>(&mut self, operation: F) -> EngineResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = EngineResult<T>>,
    {
        let start_time = Instant::now();
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < self.policy.max_attempts {
            self.check_circuit_breaker()?;
            self.check_total_timeout(&start_time)?;

            attempt += 1;

            match self
                .execute_single_attempt(&operation, attempt, &mut last_error)
                .await
            {
                Ok(response) => return Ok(response),
                Err(should_continue) => {
                    if !should_continue {
                        break;
                    }
                }
            }
        }

        self.handle_exhausted_retries(attempt, last_error, &start_time)
    }

    async fn execute_single_attempt<F, Fut, T>(
        &mut self,
        operation: &F,
        attempt: u32,
        last_error: &mut Option<EngineError>,
    ) -> Result<T, bool>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = EngineResult<T>>,
    {
        log_debug!(
            attempt = attempt,
            max_attempts = self.policy.max_attempts,
            circuit_state = ?self.circuit_breaker.state(),
            "Executing provider call with retry logic"
        );

        let operation_start = Instant::now();
        let result = tokio::time::timeout(self.policy.request_timeout, operation()).await;

        match result {
            Ok(Ok(response)) => {
                self.circuit_breaker.record_success();
                log_debug!(
                    attempt = attempt,
                    duration_ms = operation_start.elapsed().as_millis(),
                    "Provider call succeeded"
                );
                Ok(response)
            }
            Ok(Err(error)) => {
                let should_continue = self.handle_error(error, attempt, last_error).await;
                Err(should_continue)
            }
            Err(_timeout) => {
                let should_continue = self.handle_timeout(attempt, last_error).await;
                Err(should_continue)
            }
        }
    }

    fn check_total_timeout(&mut self, start_time: &Instant) -> EngineResult<()> {
        if start_time.elapsed() >= self.policy.total_timeout {
            return Err(EngineError::internal("provider retry budget exhausted"));
        }
        Ok(())
    }

    async fn handle_error(
        &mut self,
        error: EngineError,
        attempt: u32,
        last_error: &mut Option<EngineError>,
    ) -> bool {
        let should_retry = error.is_retryable();
        *last_error = Some(error);

        if should_retry && attempt < self.policy.max_attempts {
            self.circuit_breaker.record_failure();
            let delay = self.calculate_delay(attempt);
            log_debug!(
                attempt = attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis(),
                "Provider call failed, retrying after delay"
            );
            sleep(delay).await;
            true
        } else {
            self.circuit_breaker.record_failure();
            false
        }
    }

    async fn handle_timeout(&mut self, attempt: u32, last_error: &mut Option<EngineError>) -> bool {
        *last_error = Some(EngineError::request_failed(
            "unknown",
            format!("call timed out after {}s", self.policy.request_timeout.as_secs()),
            None,
        ));

        if attempt < self.policy.max_attempts {
            self.circuit_breaker.record_failure();
            let delay = self.calculate_delay(attempt);
            log_debug!(
                attempt = attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis(),
                "Provider call timed out, retrying after delay"
            );
            sleep(delay).await;
            true
        } else {
            self.circuit_breaker.record_failure();
            false
        }
    }

    fn handle_exhausted_retries<T>(
        &mut self,
        attempt: u32,
        last_error: Option<EngineError>,
        start_time: &Instant,
    ) -> EngineResult<T> {
        let final_error = last_error
            .unwrap_or_else(|| EngineError::internal("provider retry attempts exhausted"));

        log_error!(
            attempts = attempt,
            total_duration_ms = start_time.elapsed().as_millis(),
            circuit_state = ?self.circuit_breaker.state(),
            error = %final_error,
            "Provider call failed after all retry attempts"
        );

        Err(final_error)
    }

    /// Calculate delay for exponential backoff with up to 10% jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_seconds = self.policy.initial_delay.as_secs_f64()
            * self.policy.backoff_multiplier.powi((attempt - 1) as i32);

        let delay = Duration::from_secs_f64(delay_seconds.min(self.policy.max_delay.as_secs_f64()));

        let jitter = fastrand::f64() * 0.1;
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_opens_after_failure_threshold() {
        let mut circuit = CircuitBreaker {
            failure_threshold: 3,
            ..CircuitBreaker::default()
        };
        assert_eq!(circuit.state(), CircuitState::Closed);
        circuit.record_failure();
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Closed);
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.should_allow_request());
    }

    #[test]
    fn circuit_stays_open_until_recovery_timeout_elapses() {
        let mut circuit = CircuitBreaker {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(3600),
            ..CircuitBreaker::default()
        };
        circuit.record_failure();
        assert!(!circuit.should_allow_request());
    }

    #[test]
    fn half_open_success_fully_resets_the_breaker() {
        let mut circuit = CircuitBreaker {
            failure_threshold: 1,
            ..CircuitBreaker::default()
        };
        circuit.record_failure();
        circuit.state = CircuitState::HalfOpen;
        circuit.record_success();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.failure_count, 0);
    }

    #[test]
    fn calculate_delay_grows_exponentially_but_is_capped() {
        let executor = RetryExecutor::new(RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            ..RetryPolicy::default()
        });
        let first = executor.calculate_delay(1);
        let second = executor.calculate_delay(2);
        assert!(first.as_millis() >= 100 && first.as_millis() < 110);
        assert!(second.as_millis() >= 200 && second.as_millis() < 220);
        let far_out = executor.calculate_delay(10);
        assert!(far_out.as_millis() <= 550);
    }

    #[tokio::test]
    async fn execute_retries_once_on_a_retryable_error_then_succeeds() {
        let mut executor = RetryExecutor::new(RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        });
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = executor
            .execute(|| async {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n == 0 {
                    Err(EngineError::rate_limited("hunter", 1))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn execute_does_not_retry_a_non_retryable_error() {
        let mut executor = RetryExecutor::new(RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        });
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: EngineResult<()> = executor
            .execute(|| async {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(EngineError::invalid_input("bad contact"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
