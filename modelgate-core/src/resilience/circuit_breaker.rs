//! Circuit breaker state machine (§4.4): closed → open → half-open → closed,
//! fronted by the ~10s [`CircuitCache`] and backed by the tenant database via
//! [`DataAccessPort`].

use chrono::Utc;
use gateway_config::ResiliencePolicy;

use crate::circuit::{CircuitCache, CircuitState, CircuitStateKind};
use crate::error::GatewayError;
use crate::tenant::TenantScope;

/// Reads the effective circuit state for `(scope.tenant_id, provider)`,
/// checking the cache before falling back to the database.
async fn load(scope: &TenantScope, cache: &CircuitCache, provider: &str) -> CircuitState {
    if let Some(cached) = cache.get(&scope.tenant_id, provider) {
        return cached;
    }
    let state = scope.port().load_circuit_state(&scope.tenant_id, provider).await;
    cache.put(&scope.tenant_id, provider, state.clone());
    state
}

async fn store(scope: &TenantScope, cache: &CircuitCache, provider: &str, state: CircuitState) {
    scope
        .port()
        .store_circuit_state(&scope.tenant_id, provider, state.clone())
        .await;
    cache.invalidate(&scope.tenant_id, provider);
    cache.put(&scope.tenant_id, provider, state);
}

/// Returns `Ok(())` if a call to `provider` is currently allowed, or
/// `Err(CircuitOpen)` while the breaker is open and the cooldown hasn't
/// elapsed. A half-open probe is allowed through exactly once per cooldown.
pub async fn before_call(
    scope: &TenantScope,
    cache: &CircuitCache,
    provider: &str,
    policy: &ResiliencePolicy,
) -> Result<(), GatewayError> {
    let state = load(scope, cache, provider).await;
    match state.state {
        CircuitStateKind::Closed => Ok(()),
        CircuitStateKind::HalfOpen => Ok(()),
        CircuitStateKind::Open => {
            let opened_at = state.opened_at.unwrap_or_else(Utc::now);
            let elapsed = Utc::now().signed_duration_since(opened_at);
            if elapsed.num_seconds() >= policy.circuit_breaker_cooldown_secs as i64 {
                let probe = CircuitState {
                    state: CircuitStateKind::HalfOpen,
                    consecutive_failures: state.consecutive_failures,
                    opened_at: state.opened_at,
                    last_state_change: Utc::now(),
                };
                store(scope, cache, provider, probe).await;
                Ok(())
            } else {
                Err(GatewayError::CircuitOpen(provider.to_string()))
            }
        }
    }
}

/// Records a successful call: closes the breaker and resets the failure
/// counter, whether it was closed already or this was a half-open probe.
pub async fn on_success(scope: &TenantScope, cache: &CircuitCache, provider: &str) {
    let current = load(scope, cache, provider).await;
    if current.state == CircuitStateKind::Closed && current.consecutive_failures == 0 {
        return;
    }
    store(scope, cache, provider, CircuitState::closed()).await;
}

/// Records a failed call. A half-open probe failure reopens the breaker
/// immediately; a closed breaker opens once `threshold` consecutive
/// failures accumulate.
pub async fn on_failure(
    scope: &TenantScope,
    cache: &CircuitCache,
    provider: &str,
    policy: &ResiliencePolicy,
) {
    let current = load(scope, cache, provider).await;
    let next = match current.state {
        CircuitStateKind::HalfOpen => CircuitState {
            state: CircuitStateKind::Open,
            consecutive_failures: current.consecutive_failures + 1,
            opened_at: Some(Utc::now()),
            last_state_change: Utc::now(),
        },
        CircuitStateKind::Closed | CircuitStateKind::Open => {
            let failures = current.consecutive_failures + 1;
            if failures >= policy.circuit_breaker_threshold {
                CircuitState {
                    state: CircuitStateKind::Open,
                    consecutive_failures: failures,
                    opened_at: Some(Utc::now()),
                    last_state_change: Utc::now(),
                }
            } else {
                CircuitState {
                    state: CircuitStateKind::Closed,
                    consecutive_failures: failures,
                    opened_at: None,
                    last_state_change: Utc::now(),
                }
            }
        }
    };
    store(scope, cache, provider, next).await;
}
