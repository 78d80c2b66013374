//! `TenantScope` and the narrow `DataAccessPort` the core uses to reach the
//! tenant database (§3, §3.1, §6).
//!
//! The tenant database schema itself is out of scope (§1); the core only
//! ever goes through this trait. [`InMemoryTenantStore`] is the in-process
//! implementation used by tests and the CLI's standalone mode (§3.1); a real
//! database-backed implementation is an external collaborator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use gateway_config::RolePolicy;
use model_catalog::ModelCatalogEntry;

use crate::circuit::{CircuitState, InMemoryCircuitStore};
use crate::credential::ProviderCredential;
use crate::error::GatewayError;

/// Rate-limit window granularity (§4.1 stage 4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateWindow {
    Minute,
    Hour,
    Day,
}

impl RateWindow {
    pub fn seconds(self) -> f64 {
        match self {
            RateWindow::Minute => 60.0,
            RateWindow::Hour => 3600.0,
            RateWindow::Day => 86_400.0,
        }
    }
}

/// Which token-bucket a rate-limit check consumes from: the per-request
/// bucket (always 1 token per request) or the per-prompt-token-estimate
/// bucket (§4.1 stage 4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateBucketKind {
    Requests,
    Tokens,
}

/// A budget accounting period (§4.1 stage 5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BudgetPeriod {
    Day,
    Week,
    Month,
}

/// The narrow port the core uses to reach one tenant's logical database
/// (§3.1). Every method is scoped by `tenant` explicitly; implementations
/// must never let one tenant's call observe another's rows.
#[async_trait]
pub trait DataAccessPort: Send + Sync {
    async fn load_credentials(
        &self,
        tenant: &str,
        provider: &str,
    ) -> Result<Vec<ProviderCredential>, GatewayError>;

    async fn save_credential(
        &self,
        tenant: &str,
        credential: &ProviderCredential,
    ) -> Result<(), GatewayError>;

    async fn load_role_policy(
        &self,
        tenant: &str,
        role: &str,
    ) -> Result<Option<RolePolicy>, GatewayError>;

    async fn load_available_models(
        &self,
        tenant: &str,
        provider: &str,
    ) -> Result<Vec<ModelCatalogEntry>, GatewayError>;

    /// Atomically tries to consume `request_tokens` request-tokens and
    /// `estimated_prompt_tokens` prompt-tokens from the continuous-refill
    /// bucket for `(tenant, api_key, window)`. Returns `true` if both were
    /// available and have been debited.
    async fn rate_limit_try_consume(
        &self,
        tenant: &str,
        api_key: &str,
        bucket: RateBucketKind,
        window: RateWindow,
        limit: f64,
        burst: f64,
        request_tokens: f64,
    ) -> Result<bool, GatewayError>;

    async fn budget_usage(
        &self,
        tenant: &str,
        role: &str,
        period: BudgetPeriod,
    ) -> Result<f64, GatewayError>;

    async fn budget_add_usage(
        &self,
        tenant: &str,
        role: &str,
        period: BudgetPeriod,
        amount_usd: f64,
    ) -> Result<(), GatewayError>;

    async fn load_circuit_state(&self, tenant: &str, provider: &str) -> CircuitState;

    async fn store_circuit_state(&self, tenant: &str, provider: &str, state: CircuitState);
}

/// A request-bound handle fixing the tenant id, API-key id, resolved role
/// ids, and the tenant's own data-access port (§3 invariant: never crossed to
/// another tenant).
#[derive(Clone)]
pub struct TenantScope {
    pub tenant_id: String,
    pub api_key_id: String,
    pub role_ids: Vec<String>,
    port: Arc<dyn DataAccessPort>,
}

impl TenantScope {
    pub fn new(
        tenant_id: impl Into<String>,
        api_key_id: impl Into<String>,
        role_ids: Vec<String>,
        port: Arc<dyn DataAccessPort>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            api_key_id: api_key_id.into(),
            role_ids,
            port,
        }
    }

    pub fn port(&self) -> &Arc<dyn DataAccessPort> {
        &self.port
    }
}

/// Resolves a bearer API key to the [`TenantScope`] it authorises (§6
/// "Authentication"). Issuance of the key itself — the admin UI, session
/// management — is out of scope (§1); this is the narrow read seam the HTTP
/// layer needs to turn `Authorization: Bearer <key>` into a scope.
#[async_trait]
pub trait ApiKeyDirectory: Send + Sync {
    async fn resolve(&self, api_key: &str) -> Result<TenantScope, GatewayError>;
}

/// An in-memory `ApiKeyDirectory` for tests and the CLI's standalone mode:
/// every registered key shares one [`DataAccessPort`].
pub struct InMemoryApiKeyDirectory {
    port: Arc<dyn DataAccessPort>,
    keys: Mutex<HashMap<String, (String, Vec<String>)>>,
}

impl InMemoryApiKeyDirectory {
    pub fn new(port: Arc<dyn DataAccessPort>) -> Self {
        Self {
            port,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `api_key` as authorising `tenant` with `role_ids`. The key
    /// itself doubles as its own id in this in-memory stand-in.
    pub fn register(&self, api_key: &str, tenant: &str, role_ids: Vec<String>) {
        self.keys
            .lock()
            .unwrap()
            .insert(api_key.to_string(), (tenant.to_string(), role_ids));
    }
}

#[async_trait]
impl ApiKeyDirectory for InMemoryApiKeyDirectory {
    async fn resolve(&self, api_key: &str) -> Result<TenantScope, GatewayError> {
        let (tenant, role_ids) = self
            .keys
            .lock()
            .unwrap()
            .get(api_key)
            .cloned()
            .ok_or(GatewayError::ApiKeyRequired)?;
        if role_ids.is_empty() {
            return Err(GatewayError::NoRoleAssigned);
        }
        Ok(TenantScope::new(tenant, api_key, role_ids, self.port.clone()))
    }
}

struct RateBucket {
    tokens: f64,
    last_refill: f64,
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// In-memory `DataAccessPort` for tests and the CLI's standalone mode.
pub struct InMemoryTenantStore {
    credentials: Mutex<HashMap<(String, String), Vec<ProviderCredential>>>,
    policies: Mutex<HashMap<(String, String), RolePolicy>>,
    catalogs: Mutex<HashMap<(String, String), Vec<ModelCatalogEntry>>>,
    rate_buckets: Mutex<HashMap<(String, String, &'static str, &'static str), RateBucket>>,
    budgets: Mutex<HashMap<(String, String, &'static str), f64>>,
    circuits: InMemoryCircuitStore,
}

impl Default for InMemoryTenantStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self {
            credentials: Mutex::new(HashMap::new()),
            policies: Mutex::new(HashMap::new()),
            catalogs: Mutex::new(HashMap::new()),
            rate_buckets: Mutex::new(HashMap::new()),
            budgets: Mutex::new(HashMap::new()),
            circuits: InMemoryCircuitStore::new(),
        }
    }

    pub fn set_credentials(&self, tenant: &str, provider: &str, creds: Vec<ProviderCredential>) {
        self.credentials
            .lock()
            .unwrap()
            .insert((tenant.to_string(), provider.to_string()), creds);
    }

    pub fn set_role_policy(&self, tenant: &str, role: &str, policy: RolePolicy) {
        self.policies
            .lock()
            .unwrap()
            .insert((tenant.to_string(), role.to_string()), policy);
    }

    pub fn set_available_models(
        &self,
        tenant: &str,
        provider: &str,
        entries: Vec<ModelCatalogEntry>,
    ) {
        self.catalogs
            .lock()
            .unwrap()
            .insert((tenant.to_string(), provider.to_string()), entries);
    }

    pub fn set_budget_usage(&self, tenant: &str, role: &str, period: BudgetPeriod, amount: f64) {
        self.budgets.lock().unwrap().insert(
            (tenant.to_string(), role.to_string(), period_key(period)),
            amount,
        );
    }
}

fn window_key(window: RateWindow) -> &'static str {
    match window {
        RateWindow::Minute => "minute",
        RateWindow::Hour => "hour",
        RateWindow::Day => "day",
    }
}

fn bucket_key(bucket: RateBucketKind) -> &'static str {
    match bucket {
        RateBucketKind::Requests => "requests",
        RateBucketKind::Tokens => "tokens",
    }
}

fn period_key(period: BudgetPeriod) -> &'static str {
    match period {
        BudgetPeriod::Day => "day",
        BudgetPeriod::Week => "week",
        BudgetPeriod::Month => "month",
    }
}

#[async_trait]
impl DataAccessPort for InMemoryTenantStore {
    async fn load_credentials(
        &self,
        tenant: &str,
        provider: &str,
    ) -> Result<Vec<ProviderCredential>, GatewayError> {
        Ok(self
            .credentials
            .lock()
            .unwrap()
            .get(&(tenant.to_string(), provider.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_credential(
        &self,
        tenant: &str,
        credential: &ProviderCredential,
    ) -> Result<(), GatewayError> {
        let mut map = self.credentials.lock().unwrap();
        let list = map
            .entry((tenant.to_string(), credential.provider.clone()))
            .or_default();
        if let Some(existing) = list.iter_mut().find(|c| c.id == credential.id) {
            *existing = credential.clone();
        } else {
            list.push(credential.clone());
        }
        Ok(())
    }

    async fn load_role_policy(
        &self,
        tenant: &str,
        role: &str,
    ) -> Result<Option<RolePolicy>, GatewayError> {
        Ok(self
            .policies
            .lock()
            .unwrap()
            .get(&(tenant.to_string(), role.to_string()))
            .cloned())
    }

    async fn load_available_models(
        &self,
        tenant: &str,
        provider: &str,
    ) -> Result<Vec<ModelCatalogEntry>, GatewayError> {
        Ok(self
            .catalogs
            .lock()
            .unwrap()
            .get(&(tenant.to_string(), provider.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn rate_limit_try_consume(
        &self,
        tenant: &str,
        api_key: &str,
        bucket: RateBucketKind,
        window: RateWindow,
        limit: f64,
        burst: f64,
        request_tokens: f64,
    ) -> Result<bool, GatewayError> {
        let mut buckets = self.rate_buckets.lock().unwrap();
        let key = (
            tenant.to_string(),
            api_key.to_string(),
            window_key(window),
            bucket_key(bucket),
        );
        let cap = limit + burst;
        let now = now_secs();
        let bucket = buckets.entry(key).or_insert_with(|| RateBucket {
            tokens: cap,
            last_refill: now,
        });

        let elapsed = (now - bucket.last_refill).max(0.0);
        let refill_rate = limit / window.seconds();
        bucket.tokens = (bucket.tokens + elapsed * refill_rate).min(cap);
        bucket.last_refill = now;

        if bucket.tokens >= request_tokens {
            bucket.tokens -= request_tokens;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn budget_usage(
        &self,
        tenant: &str,
        role: &str,
        period: BudgetPeriod,
    ) -> Result<f64, GatewayError> {
        Ok(*self
            .budgets
            .lock()
            .unwrap()
            .get(&(tenant.to_string(), role.to_string(), period_key(period)))
            .unwrap_or(&0.0))
    }

    async fn budget_add_usage(
        &self,
        tenant: &str,
        role: &str,
        period: BudgetPeriod,
        amount_usd: f64,
    ) -> Result<(), GatewayError> {
        let mut budgets = self.budgets.lock().unwrap();
        let entry = budgets
            .entry((tenant.to_string(), role.to_string(), period_key(period)))
            .or_insert(0.0);
        *entry += amount_usd;
        Ok(())
    }

    async fn load_circuit_state(&self, tenant: &str, provider: &str) -> CircuitState {
        self.circuits.load(tenant, provider)
    }

    async fn store_circuit_state(&self, tenant: &str, provider: &str, state: CircuitState) {
        self.circuits.store(tenant, provider, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limit_allows_up_to_burst_then_blocks() {
        let store = InMemoryTenantStore::new();
        for _ in 0..5 {
            let allowed = store
                .rate_limit_try_consume(
                    "t1",
                    "key1",
                    RateBucketKind::Requests,
                    RateWindow::Minute,
                    5.0,
                    0.0,
                    1.0,
                )
                .await
                .unwrap();
            assert!(allowed);
        }
        let blocked = store
            .rate_limit_try_consume(
                "t1",
                "key1",
                RateBucketKind::Requests,
                RateWindow::Minute,
                5.0,
                0.0,
                1.0,
            )
            .await
            .unwrap();
        assert!(!blocked);
    }

    #[tokio::test]
    async fn budget_usage_accumulates() {
        let store = InMemoryTenantStore::new();
        store
            .budget_add_usage("t1", "role1", BudgetPeriod::Day, 1.5)
            .await
            .unwrap();
        store
            .budget_add_usage("t1", "role1", BudgetPeriod::Day, 2.5)
            .await
            .unwrap();
        let usage = store
            .budget_usage("t1", "role1", BudgetPeriod::Day)
            .await
            .unwrap();
        assert_eq!(usage, 4.0);
    }

    #[tokio::test]
    async fn credentials_are_scoped_per_tenant() {
        let store = InMemoryTenantStore::new();
        store.set_credentials(
            "t1",
            "openai",
            vec![crate::credential::ProviderCredential {
                id: "c1".into(),
                provider: "openai".into(),
                kind: crate::credential::CredentialKind::BearerKey,
                encrypted_bearer_key: None,
                encrypted_access_key: None,
                encrypted_secret_key: None,
                priority: 0,
                enabled: true,
                health: 1.0,
                success_count: 0,
                failure_count: 0,
                rate_limit_remaining: None,
                rate_limit_reset_at: None,
                last_used_at: None,
            }],
        );
        let t1 = store.load_credentials("t1", "openai").await.unwrap();
        let t2 = store.load_credentials("t2", "openai").await.unwrap();
        assert_eq!(t1.len(), 1);
        assert!(t2.is_empty());
    }

    #[tokio::test]
    async fn known_api_key_resolves_to_its_tenant_and_roles() {
        let directory = InMemoryApiKeyDirectory::new(Arc::new(InMemoryTenantStore::new()));
        directory.register("sk-test-1", "t1", vec!["default".into()]);
        let scope = directory.resolve("sk-test-1").await.unwrap();
        assert_eq!(scope.tenant_id, "t1");
        assert_eq!(scope.role_ids, vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn unknown_api_key_is_refused_not_defaulted() {
        let directory = InMemoryApiKeyDirectory::new(Arc::new(InMemoryTenantStore::new()));
        let err = directory.resolve("sk-does-not-exist").await.unwrap_err();
        assert!(matches!(err, GatewayError::ApiKeyRequired));
    }

    #[tokio::test]
    async fn key_with_no_roles_assigned_is_refused() {
        let directory = InMemoryApiKeyDirectory::new(Arc::new(InMemoryTenantStore::new()));
        directory.register("sk-no-roles", "t1", vec![]);
        let err = directory.resolve("sk-no-roles").await.unwrap_err();
        assert!(matches!(err, GatewayError::NoRoleAssigned));
    }
}
