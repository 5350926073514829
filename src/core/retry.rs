//! Retry with exponential backoff and jitter.
//!
//! Attempt failures are modelled as a tagged outcome rather than a blanket
//! error type: a retryable upstream status carries the status (and the
//! response it arrived on) separately from transport-level failures, so the
//! orchestrator can classify terminal outcomes without string matching.
use std::{fmt, future::Future, time::Duration};

use axum::body::Body;
use hyper::{Response, StatusCode};
use rand::Rng;

use crate::core::model::RetryConfig;

/// Failure of a single upstream attempt.
pub enum AttemptError {
    /// The upstream answered with a status the policy treats as transient.
    RetryableStatus {
        status: StatusCode,
        response: Response<Body>,
    },
    /// The per-attempt timeout fired before the upstream answered.
    TimedOut { after_ms: u64 },
    /// Connection-level failure reaching the upstream (refused, reset,
    /// unresolved host).
    Transport { message: String },
    /// The request could not be issued at all; never retried.
    Fatal { message: String },
}

impl AttemptError {
    /// Whether the retry policy may re-issue the attempt.
    pub fn is_retryable(&self, config: &RetryConfig) -> bool {
        match self {
            Self::RetryableStatus { status, .. } => {
                config.retryable_status_codes.contains(&status.as_u16())
            }
            Self::TimedOut { .. } | Self::Transport { .. } => true,
            Self::Fatal { .. } => false,
        }
    }
}

impl fmt::Debug for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryableStatus { status, .. } => {
                write!(f, "RetryableStatus({status})")
            }
            Self::TimedOut { after_ms } => write!(f, "TimedOut({after_ms}ms)"),
            Self::Transport { message } => write!(f, "Transport({message})"),
            Self::Fatal { message } => write!(f, "Fatal({message})"),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryableStatus { status, .. } => {
                write!(f, "upstream returned retryable status {status}")
            }
            Self::TimedOut { after_ms } => write!(f, "attempt timed out after {after_ms} ms"),
            Self::Transport { message } => write!(f, "{message}"),
            Self::Fatal { message } => write!(f, "{message}"),
        }
    }
}

/// Backoff delay after attempt `attempt` (0-based): the capped exponential
/// `min(base · 2^attempt, max)`, jittered additively by up to 25 % of the
/// capped value.
pub fn calculate_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> Duration {
    let exponential = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    let capped = exponential.min(max_delay_ms);
    let jitter = (rand::rng().random_range(0.0..0.25) * capped as f64) as u64;
    Duration::from_millis(capped.saturating_add(jitter))
}

/// Run `attempt_fn` up to `max_retries + 1` times.
///
/// `attempt_fn` receives the 0-based attempt index. Non-retryable failures
/// short-circuit. `on_retry` is invoked with the 1-based retry number and the
/// chosen delay before each sleep. When the policy is disabled the function
/// is called exactly once and its outcome returned verbatim.
pub async fn with_retry<T, F, Fut, R>(
    config: &RetryConfig,
    mut attempt_fn: F,
    mut on_retry: R,
) -> Result<T, AttemptError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
    R: FnMut(u32, Duration),
{
    if !config.enabled {
        return attempt_fn(0).await;
    }

    let mut attempt = 0;
    loop {
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= config.max_retries || !error.is_retryable(config) {
                    return Err(error);
                }
                let delay = calculate_delay(attempt, config.base_delay_ms, config.max_delay_ms);
                attempt += 1;
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying upstream attempt"
                );
                on_retry(attempt, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
