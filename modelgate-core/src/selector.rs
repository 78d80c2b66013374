//! Credential selection (§4.3): health-scored, rate-limit-aware, priority +
//! round-robin choice of provider keys, plus the telemetry callbacks the
//! resilience executor uses to report back what happened.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use gateway_config::ProviderFamily;

use crate::credential::{FailureKind, ProviderCredential};
use crate::error::GatewayError;
use crate::tenant::TenantScope;

/// In-process round-robin counters, keyed by `tenant:provider` (§5 "shared
/// mutable state"). One instance is shared across every request the
/// dispatcher handles for a process.
#[derive(Default)]
pub struct CredentialSelector {
    counters: DashMap<String, AtomicUsize>,
}

impl CredentialSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks one credential for `(scope.tenant_id, provider)`. `family`
    /// decides the bedrock access/secret-before-bearer-key tiebreak.
    pub async fn select(
        &self,
        scope: &TenantScope,
        provider: &str,
        family: ProviderFamily,
    ) -> Result<ProviderCredential, GatewayError> {
        let mut candidates: Vec<ProviderCredential> = scope
            .port()
            .load_credentials(&scope.tenant_id, provider)
            .await?
            .into_iter()
            .filter(|c| c.enabled)
            .collect();

        if candidates.is_empty() {
            return Err(GatewayError::ProviderError(format!(
                "no enabled credentials for provider {provider}"
            )));
        }

        candidates.sort_by(|a, b| {
            family_rank(family, a)
                .cmp(&family_rank(family, b))
                .then(a.priority.cmp(&b.priority))
                .then(b.health.partial_cmp(&a.health).unwrap_or(std::cmp::Ordering::Equal))
        });

        let now = Utc::now();
        let available: Vec<&ProviderCredential> = candidates
            .iter()
            .filter(|c| match (c.rate_limit_remaining, c.rate_limit_reset_at) {
                (Some(0), Some(reset)) => reset <= now,
                _ => true,
            })
            .collect();

        let chosen = if available.is_empty() {
            // Every credential is currently rate-limited; wait the minimum
            // by picking the one with the earliest reset.
            candidates
                .iter()
                .min_by_key(|c| c.rate_limit_reset_at.unwrap_or(now))
                .expect("candidates is non-empty")
                .clone()
        } else {
            let top_tier_key = (family_rank(family, available[0]), available[0].priority);
            let tier: Vec<&&ProviderCredential> = available
                .iter()
                .take_while(|c| (family_rank(family, c), c.priority) == top_tier_key)
                .collect();

            let counter_key = format!("{}:{provider}", scope.tenant_id);
            let counter = self
                .counters
                .entry(counter_key)
                .or_insert_with(|| AtomicUsize::new(0));
            let index = counter.fetch_add(1, Ordering::Relaxed) % tier.len();
            (*tier[index]).clone()
        };

        self.record_selection(scope, &chosen).await;
        Ok(chosen)
    }

    /// Fire-and-forget: bumps `last_used_at` without blocking the caller.
    async fn record_selection(&self, scope: &TenantScope, credential: &ProviderCredential) {
        let mut updated = credential.clone();
        updated.last_used_at = Some(Utc::now());
        let _ = scope.port().save_credential(&scope.tenant_id, &updated).await;
    }

    /// `RecordSuccess` telemetry callback (§4.3).
    pub async fn record_success(
        &self,
        scope: &TenantScope,
        credential: &ProviderCredential,
        rate_limit_remaining: Option<u32>,
        rate_limit_reset_at: Option<chrono::DateTime<Utc>>,
    ) {
        let mut updated = credential.clone();
        updated.record_success();
        updated.rate_limit_remaining = rate_limit_remaining;
        updated.rate_limit_reset_at = rate_limit_reset_at;
        let _ = scope.port().save_credential(&scope.tenant_id, &updated).await;
    }

    /// `RecordFailure` telemetry callback (§4.3).
    pub async fn record_failure(
        &self,
        scope: &TenantScope,
        credential: &ProviderCredential,
        kind: FailureKind,
    ) {
        let mut updated = credential.clone();
        updated.record_failure(kind);
        let _ = scope.port().save_credential(&scope.tenant_id, &updated).await;
    }

    /// `DisableKey` telemetry callback (§4.3); typically called after an
    /// auth failure so future selections skip this credential.
    pub async fn disable_key(&self, scope: &TenantScope, credential: &ProviderCredential) {
        let mut updated = credential.clone();
        updated.enabled = false;
        let _ = scope.port().save_credential(&scope.tenant_id, &updated).await;
    }
}

/// Lower sorts first. Bedrock prefers access+secret-pair credentials over
/// bearer-key ones, to enable true streaming paths (§4.3 step 1).
fn family_rank(family: ProviderFamily, credential: &ProviderCredential) -> u8 {
    if family != ProviderFamily::Bedrock {
        return 0;
    }
    match credential.kind {
        crate::credential::CredentialKind::AccessSecretPair
        | crate::credential::CredentialKind::Both => 0,
        crate::credential::CredentialKind::BearerKey => 1,
    }
}
