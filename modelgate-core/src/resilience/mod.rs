//! The resilience executor (§4.4): retry wraps the primary call; on
//! exhaustion, the fallback chain takes over. Composition order matters —
//! the chain is never itself retried.

pub mod circuit_breaker;
pub mod fallback;
pub mod retry;

use gateway_config::{FallbackEntry, ResiliencePolicy};

use crate::circuit::CircuitCache;
use crate::error::GatewayError;
use crate::tenant::TenantScope;

/// `Execute(ctx, tenant, ResiliencePolicy, primary-fn, fallback-fn)` (§4.4).
///
/// Runs the retry loop against `primary`, consulting the primary provider's
/// circuit breaker before each attempt. If every retry fails and
/// `policy.fallback_enabled`, hands off to the fallback chain via
/// `fallback`; otherwise propagates the retry loop's error directly.
pub async fn execute<P, PFut, Fb, FbFut, T>(
    scope: &TenantScope,
    cache: &CircuitCache,
    primary_provider: &str,
    policy: &ResiliencePolicy,
    mut primary: P,
    fallback_fn: Fb,
) -> Result<T, GatewayError>
where
    P: FnMut() -> PFut,
    PFut: std::future::Future<Output = Result<T, GatewayError>>,
    Fb: FnMut(&FallbackEntry) -> FbFut,
    FbFut: std::future::Future<Output = Result<T, GatewayError>>,
{
    let primary_result = retry::with_retry(policy, || async {
        circuit_breaker::before_call(scope, cache, primary_provider, policy).await?;
        match primary().await {
            Ok(value) => {
                circuit_breaker::on_success(scope, cache, primary_provider).await;
                Ok(value)
            }
            Err(error) => {
                circuit_breaker::on_failure(scope, cache, primary_provider, policy).await;
                Err(error)
            }
        }
    })
    .await;

    match primary_result {
        Ok(value) => Ok(value),
        Err(_) if policy.fallback_enabled && !policy.fallback_chain.is_empty() => {
            fallback::run_chain(scope, cache, policy, fallback_fn).await
        }
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::InMemoryTenantStore;
    use std::sync::Arc;

    fn scope(store: Arc<InMemoryTenantStore>) -> TenantScope {
        TenantScope::new("t1", "key1", vec!["default".into()], store)
    }

    #[tokio::test]
    async fn primary_success_never_touches_fallback() {
        let cache = CircuitCache::new();
        let s = scope(Arc::new(InMemoryTenantStore::new()));
        let policy = ResiliencePolicy {
            fallback_enabled: true,
            fallback_chain: vec![FallbackEntry {
                provider: "anthropic".into(),
                model: "default".into(),
                priority: 0,
                timeout_secs: 5,
            }],
            ..ResiliencePolicy::default()
        };
        let result = execute(
            &s,
            &cache,
            "openai",
            &policy,
            || async { Ok::<_, GatewayError>("primary-ok") },
            |_e| async { Ok("fallback-ok") },
        )
        .await
        .unwrap();
        assert_eq!(result, "primary-ok");
    }

    #[tokio::test]
    async fn primary_exhaustion_falls_through_to_the_chain() {
        let cache = CircuitCache::new();
        let s = scope(Arc::new(InMemoryTenantStore::new()));
        let policy = ResiliencePolicy {
            fallback_enabled: true,
            fallback_chain: vec![FallbackEntry {
                provider: "anthropic".into(),
                model: "default".into(),
                priority: 0,
                timeout_secs: 5,
            }],
            ..ResiliencePolicy::default()
        };
        let result = execute(
            &s,
            &cache,
            "openai",
            &policy,
            || async { Err::<&str, _>(GatewayError::ProviderError("500".into())) },
            |_e| async { Ok("fallback-ok") },
        )
        .await
        .unwrap();
        assert_eq!(result, "fallback-ok");
    }

    #[tokio::test]
    async fn fallback_disabled_propagates_primary_error_directly() {
        let cache = CircuitCache::new();
        let s = scope(Arc::new(InMemoryTenantStore::new()));
        let policy = ResiliencePolicy {
            fallback_enabled: false,
            ..ResiliencePolicy::default()
        };
        let err = execute(
            &s,
            &cache,
            "openai",
            &policy,
            || async { Err::<(), _>(GatewayError::ProviderError("boom".into())) },
            |_e| async { Ok(()) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::ProviderError(msg) if msg == "boom"));
    }

    #[tokio::test]
    async fn open_circuit_propagates_as_circuit_open_not_max_retries_exceeded() {
        let cache = CircuitCache::new();
        let s = scope(Arc::new(InMemoryTenantStore::new()));
        let policy = ResiliencePolicy {
            fallback_enabled: false,
            circuit_breaker_threshold: 1,
            circuit_breaker_cooldown_secs: 60,
            ..ResiliencePolicy::default()
        };

        // First call fails and opens the breaker (threshold = 1).
        let _ = execute(
            &s,
            &cache,
            "openai",
            &policy,
            || async { Err::<(), _>(GatewayError::ProviderError("500".into())) },
            |_e| async { Ok(()) },
        )
        .await;

        // Second call must be rejected by the now-open breaker, surfaced as
        // `CircuitOpen` unrewrapped — never `MaxRetriesExceeded` (§8 scenario 6).
        let err = execute(
            &s,
            &cache,
            "openai",
            &policy,
            || async { Ok::<(), _>(()) },
            |_e| async { Ok(()) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen(_)));
    }
}
