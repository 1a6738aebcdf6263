use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::warn;

use super::cancel::Cancellation;

/// Uniform jitter in `[0, max]`.
pub fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

pub fn no_jitter(_max: Duration) -> Duration {
    Duration::ZERO
}

/// Exponential backoff shared by the extraction and ledger calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
    pub jitter: fn(Duration) -> Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(500),
            jitter: random_jitter,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent { attempts: u32, error: E },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, without jitter:
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff plus jitter. Never exceeds `max_delay + max_jitter`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_delay(attempt) + (self.jitter)(self.max_jitter).min(self.max_jitter)
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts,
    /// or `cancel` fires. Cancellation is observed before each attempt and
    /// while sleeping between attempts, never mid-call.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        cancel: &Cancellation,
        is_transient: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let ceiling = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            attempt += 1;

            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !is_transient(&error) {
                return Err(RetryError::Permanent { attempts: attempt, error });
            }
            if attempt >= ceiling {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.delay_after(attempt);
            warn!(
                operation,
                attempt,
                max_attempts = ceiling,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
            }
        }
    }
}
