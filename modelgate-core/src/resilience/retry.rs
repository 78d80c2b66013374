//! Retry with jittered exponential backoff (§4.4).
//!
//! Error classification is a fixed substring vocabulary, not a typed error
//! hierarchy from the provider — adapters surface failures as
//! `GatewayError::ProviderError(message)` and the message is all retry has
//! to go on, same as the manager this is modeled on.

use std::future::Future;
use std::time::Duration;

use gateway_config::ResiliencePolicy;
use rand::Rng;

use crate::error::GatewayError;

const TIMEOUT_MARKERS: &[&str] = &["timeout", "deadline exceeded"];
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "429"];
const SERVER_ERROR_MARKERS: &[&str] = &[
    "500",
    "502",
    "503",
    "504",
    "connection refused",
    "connection reset",
    "broken pipe",
];

fn contains_any(message: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| message.contains(m))
}

/// Whether `error` should be retried under `policy`. Policy-class errors
/// (auth, model/prompt/tool/rate/budget rejections) are never retryable —
/// retrying a deny-by-default policy decision can't make it succeed.
fn is_retryable(error: &GatewayError, policy: &ResiliencePolicy) -> bool {
    if error.is_policy() {
        return false;
    }
    let message = error.to_string().to_lowercase();
    (policy.retry_on_timeout && contains_any(&message, TIMEOUT_MARKERS))
        || (policy.retry_on_rate_limit && contains_any(&message, RATE_LIMIT_MARKERS))
        || (policy.retry_on_server_error && contains_any(&message, SERVER_ERROR_MARKERS))
}

fn backoff_duration(policy: &ResiliencePolicy, attempt: u32) -> Duration {
    let exp = policy.base_backoff_ms.saturating_mul(1u64 << attempt.min(32));
    let capped = exp.min(policy.max_backoff_ms);
    if !policy.jitter || capped == 0 {
        return Duration::from_millis(capped);
    }
    let jitter_span = (capped as f64 * 0.25) as i64;
    let delta = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    let jittered = (capped as i64 + delta).max(0) as u64;
    Duration::from_millis(jittered)
}

/// Runs `attempt` up to `1 + policy.max_retries` times (or once, if retry is
/// disabled), sleeping between attempts per the backoff formula above.
///
/// A non-retryable error (per `is_retryable`) propagates immediately,
/// unchanged (§4.4 "Non-retryable errors propagate immediately") — it is
/// never wrapped, even on the first attempt. Only once a *retryable* error
/// survives every attempt does this synthesize
/// `GatewayError::MaxRetriesExceeded` naming the last failure.
pub async fn with_retry<F, Fut, T>(policy: &ResiliencePolicy, mut attempt: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let total_attempts = if policy.retry_enabled {
        1 + policy.max_retries
    } else {
        1
    };

    for n in 0..total_attempts {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !is_retryable(&error, policy) {
                    return Err(error);
                }
                if n + 1 >= total_attempts {
                    return Err(GatewayError::MaxRetriesExceeded(error.to_string()));
                }
                tokio::time::sleep(backoff_duration(policy, n + 1)).await;
            }
        }
    }

    unreachable!("total_attempts is always >= 1")
}
