//! Fallback chain (§4.4): priority-ordered, single attempt per entry, each
//! bounded by its own timeout. Not wrapped in retry — a fallback entry
//! either works on the first try or the chain moves on.

use gateway_config::{FallbackEntry, ResiliencePolicy};

use crate::circuit::CircuitCache;
use crate::error::GatewayError;
use crate::tenant::TenantScope;

use super::circuit_breaker;

/// Runs `attempt(entry)` for each entry in `policy.fallback_chain`, in
/// priority order, skipping entries whose circuit breaker is open. Returns
/// the first success; on total exhaustion, the last failure seen (or
/// `AllProvidersUnavailable` if every entry was breaker-blocked).
pub async fn run_chain<F, Fut, T>(
    scope: &TenantScope,
    cache: &CircuitCache,
    policy: &ResiliencePolicy,
    mut attempt: F,
) -> Result<T, GatewayError>
where
    F: FnMut(&FallbackEntry) -> Fut,
    Fut: std::future::Future<Output = Result<T, GatewayError>>,
{
    let mut chain: Vec<&FallbackEntry> = policy.fallback_chain.iter().collect();
    chain.sort_by_key(|e| e.priority);

    let mut last_error = None;

    for entry in chain {
        if circuit_breaker::before_call(scope, cache, &entry.provider, policy)
            .await
            .is_err()
        {
            continue;
        }

        let timeout = std::time::Duration::from_secs(entry.timeout_secs);
        let outcome = tokio::time::timeout(timeout, attempt(entry)).await;

        match outcome {
            Ok(Ok(value)) => {
                circuit_breaker::on_success(scope, cache, &entry.provider).await;
                return Ok(value);
            }
            Ok(Err(error)) => {
                circuit_breaker::on_failure(scope, cache, &entry.provider, policy).await;
                last_error = Some(error);
            }
            Err(_elapsed) => {
                circuit_breaker::on_failure(scope, cache, &entry.provider, policy).await;
                last_error = Some(GatewayError::ProviderError(format!(
                    "fallback provider {} timed out after {}s",
                    entry.provider, entry.timeout_secs
                )));
            }
        }
    }

    match last_error {
        Some(error) => Err(error),
        None => Err(GatewayError::AllProvidersUnavailable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::InMemoryTenantStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn scope(store: Arc<InMemoryTenantStore>) -> TenantScope {
        TenantScope::new("t1", "key1", vec!["default".into()], store)
    }

    fn entry(provider: &str, priority: u32) -> FallbackEntry {
        FallbackEntry {
            provider: provider.to_string(),
            model: "default".to_string(),
            priority,
            timeout_secs: 5,
        }
    }

    fn policy_with(chain: Vec<FallbackEntry>) -> ResiliencePolicy {
        ResiliencePolicy {
            fallback_enabled: true,
            fallback_chain: chain,
            ..ResiliencePolicy::default()
        }
    }

    #[tokio::test]
    async fn first_entry_success_short_circuits_the_chain() {
        let cache = CircuitCache::new();
        let s = scope(Arc::new(InMemoryTenantStore::new()));
        let policy = policy_with(vec![entry("anthropic", 0), entry("gemini", 1)]);
        let calls = AtomicU32::new(0);
        let result = run_chain(&s, &cache, &policy, |_entry| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, GatewayError>("ok") }
        })
        .await
        .unwrap();
        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_through_to_next_entry_on_failure() {
        let cache = CircuitCache::new();
        let s = scope(Arc::new(InMemoryTenantStore::new()));
        let policy = policy_with(vec![entry("anthropic", 0), entry("gemini", 1)]);
        let result = run_chain(&s, &cache, &policy, |e| {
            let provider = e.provider.clone();
            async move {
                if provider == "anthropic" {
                    Err(GatewayError::ProviderError("down".into()))
                } else {
                    Ok("gemini-ok")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, "gemini-ok");
    }

    #[tokio::test]
    async fn exhausting_every_entry_returns_the_last_failure() {
        let cache = CircuitCache::new();
        let s = scope(Arc::new(InMemoryTenantStore::new()));
        let policy = policy_with(vec![entry("anthropic", 0), entry("gemini", 1)]);
        let err = run_chain(&s, &cache, &policy, |e| {
            let provider = e.provider.clone();
            async move { Err::<(), _>(GatewayError::ProviderError(format!("{provider} down"))) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::ProviderError(msg) if msg.contains("gemini")));
    }

    #[tokio::test]
    async fn empty_chain_is_all_providers_unavailable() {
        let cache = CircuitCache::new();
        let s = scope(Arc::new(InMemoryTenantStore::new()));
        let policy = policy_with(vec![]);
        let err = run_chain(&s, &cache, &policy, |_e: &FallbackEntry| async {
            Ok::<(), GatewayError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::AllProvidersUnavailable));
    }

    #[tokio::test]
    async fn entries_are_tried_in_priority_order() {
        let cache = CircuitCache::new();
        let s = scope(Arc::new(InMemoryTenantStore::new()));
        let policy = policy_with(vec![entry("low-priority", 9), entry("high-priority", 0)]);
        let order = std::sync::Mutex::new(Vec::new());
        let _ = run_chain(&s, &cache, &policy, |e| {
            order.lock().unwrap().push(e.provider.clone());
            async { Err::<(), _>(GatewayError::ProviderError("fail".into())) }
        })
        .await;
        assert_eq!(
            *order.lock().unwrap(),
            vec!["high-priority".to_string(), "low-priority".to_string()]
        );
    }
}
