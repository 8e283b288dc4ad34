/// Retry policy with capped exponential backoff
///
/// The policy itself is stateless: the caller owns the attempt counter and asks
/// the policy whether another attempt is allowed and how long to wait first.
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics::RetryMetrics;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth factor applied per retry
    pub backoff_multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
            max_delay,
        }
    }

    /// Whether another attempt may follow `attempt` completed attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// `min(base_delay * backoff_multiplier^attempt, max_delay)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let nanos = self.base_delay.as_nanos() as f64 * factor;
        let cap = self.max_delay.as_nanos() as f64;

        if !nanos.is_finite() || nanos >= cap {
            self.max_delay
        } else {
            Duration::from_nanos(nanos.max(0.0).round() as u64).min(self.max_delay)
        }
    }
}

/// Suspension point between attempts.
///
/// Production code sleeps on the tokio timer; tests inject a recording sleeper
/// so backoff sequences can be asserted without waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
    #[error("non-retryable failure on attempt {attempts}: {error}")]
    Aborted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Aborted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

/// Successful result together with the number of attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Execute a future with retry logic, sleeping on the tokio timer.
///
/// Every error is treated as transient.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_classified(policy, &TokioSleeper, f, |_| true)
        .await
        .map(|attempted| attempted.value)
}

/// Execute a future with retry logic.
///
/// `is_retryable` decides per error whether the sequence continues; a `false`
/// answer ends it immediately with [`RetryError::Aborted`]. Attempts run
/// strictly one after another and the sleeper is awaited between them.
pub async fn retry_classified<S, F, Fut, T, E, C>(
    policy: &RetryPolicy,
    sleeper: &S,
    mut f: F,
    is_retryable: C,
) -> Result<Attempted<T>, RetryError<E>>
where
    S: Sleeper + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match f().await {
            Ok(value) => {
                RetryMetrics::record_attempts("success", attempt);
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(e) if !is_retryable(&e) => {
                debug!(attempt, error = %e, "Non-retryable failure");
                RetryMetrics::record_attempts("aborted", attempt);
                return Err(RetryError::Aborted {
                    attempts: attempt,
                    error: e,
                });
            }
            Err(e) => {
                if !policy.should_retry(attempt) {
                    warn!(
                        attempts = attempt,
                        error = %e,
                        "Max attempts ({}) reached", policy.max_attempts
                    );
                    RetryMetrics::record_attempts("exhausted", attempt);
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }

                let delay = policy.delay_for(attempt - 1);
                warn!(
                    error = %e,
                    "Retry attempt {}/{}, waiting {:?}",
                    attempt, policy.max_attempts, delay
                );

                sleeper.sleep(delay).await;
            }
        }
    }
}
