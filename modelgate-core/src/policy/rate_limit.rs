//! Stage 4: rate limiting (§4.1).
//!
//! Per-minute limits always apply when the policy is enabled; per-hour and
//! per-day limits apply only when configured. Every check consumes both a
//! request-token (always 1) and an estimated prompt-token count (chars/4,
//! open question §9) from independent continuous-refill buckets.

use gateway_config::RateLimitPolicy;

use crate::error::GatewayError;
use crate::message::ChatRequest;
use crate::tenant::{RateBucketKind, RateWindow, TenantScope};

/// chars/4 fallback token estimate (§9); adapters may refine this once a
/// provider's own tokenizer is available, but the rate limiter only ever
/// sees this estimate, never the provider's actual count.
pub fn estimate_tokens(request: &ChatRequest) -> f64 {
    (request.total_chars() as f64 / 4.0).ceil()
}

/// Runs every configured window against `scope`'s data-access port,
/// consuming tokens only if all configured windows currently have room.
pub async fn check(
    scope: &TenantScope,
    request: &ChatRequest,
    policy: &RateLimitPolicy,
) -> Result<(), GatewayError> {
    if !policy.enabled {
        return Ok(());
    }

    let estimated_tokens = estimate_tokens(request);
    let mut windows = Vec::new();
    if let Some(rpm) = policy.requests_per_minute {
        windows.push((RateWindow::Minute, rpm as f64));
    }
    if let Some(rph) = policy.requests_per_hour {
        windows.push((RateWindow::Hour, rph as f64));
    }
    if let Some(rpd) = policy.requests_per_day {
        windows.push((RateWindow::Day, rpd as f64));
    }

    let port = scope.port();
    for (window, limit) in &windows {
        let allowed = port
            .rate_limit_try_consume(
                &scope.tenant_id,
                &scope.api_key_id,
                RateBucketKind::Requests,
                *window,
                *limit,
                policy.burst as f64,
                1.0,
            )
            .await?;
        if !allowed {
            return Err(GatewayError::RateLimitExceeded);
        }
    }

    if let Some(tpm) = policy.tokens_per_minute {
        let allowed = port
            .rate_limit_try_consume(
                &scope.tenant_id,
                &scope.api_key_id,
                RateBucketKind::Tokens,
                RateWindow::Minute,
                tpm as f64,
                policy.burst as f64,
                estimated_tokens,
            )
            .await?;
        if !allowed {
            return Err(GatewayError::TokenRateLimitExceeded);
        }
    }

    Ok(())
}
