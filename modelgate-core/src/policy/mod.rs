//! The five-stage policy enforcement pipeline (§4.1).
//!
//! Stages run in a fixed order — model restriction, prompt, tool, rate
//! limit, budget — and stop at the first rejection. A later stage never
//! overrides an earlier one's decision, and nothing here ever synthesizes a
//! policy when a role has none configured (`GatewayError::NoPolicyConfigured`
//! is the caller's problem to fix, not the enforcer's to route around).

pub mod budget;
pub mod model_restriction;
pub mod prompt;
pub mod rate_limit;
pub mod tool;

use gateway_config::RolePolicy;
use model_catalog::ModelCache;

use crate::error::GatewayError;
use crate::message::ChatRequest;
use crate::tenant::TenantScope;
use budget::BudgetAlert;
use model_restriction::ResolvedModel;

/// Everything downstream stages (credential selection, dispatch, resilience)
/// need from a request that already passed enforcement.
#[derive(Clone, Debug)]
pub struct PolicyDecisions {
    pub resolved_model: ResolvedModel,
    pub caching_enabled: bool,
    pub caching_similarity_threshold: f64,
    pub routing_enabled: bool,
    pub routing_strategy: String,
    pub resilience: gateway_config::ResiliencePolicy,
    pub budget_alert: BudgetAlert,
}

/// Runs every stage against one resolved role policy, for one request,
/// within one tenant scope. Requested tool names are the subset of
/// `request.tools` the caller actually invoked this turn (as opposed to
/// merely advertised); stage 3 only rejects on denial of a *requested*
/// tool, per §4.1.
pub async fn enforce(
    scope: &TenantScope,
    role: &str,
    request: &mut ChatRequest,
    requested_tool_names: &[String],
    policy: &RolePolicy,
    model_cache: &ModelCache,
) -> Result<PolicyDecisions, GatewayError> {
    let resolved_model = model_restriction::resolve_and_check(
        request,
        &policy.model_restriction,
        model_cache,
    )?;

    if policy.prompt.enabled {
        prompt::check(request, &policy.prompt)?;
    }

    let filtered_tools =
        tool::check_and_filter(&request.tools, requested_tool_names, &policy.tool)?;
    request.tools = filtered_tools;

    rate_limit::check(scope, request, &policy.rate_limit).await?;

    let estimated_cost_usd = estimate_request_cost(request, model_cache, &resolved_model);
    let budget_alert = budget::check(scope, role, estimated_cost_usd, &policy.budget).await?;

    Ok(PolicyDecisions {
        resolved_model,
        caching_enabled: policy.caching.enabled,
        caching_similarity_threshold: policy.caching.similarity_threshold,
        routing_enabled: policy.routing.enabled,
        routing_strategy: policy.routing.strategy.clone(),
        resilience: policy.resilience.clone(),
        budget_alert,
    })
}

/// Rough pre-call cost estimate from the catalog's per-token pricing and the
/// chars/4 estimate (§9), used only to size the budget check; the real cost
/// is recorded from the provider's reported usage after the call completes.
fn estimate_request_cost(
    request: &ChatRequest,
    model_cache: &ModelCache,
    resolved: &ResolvedModel,
) -> f64 {
    let estimated_prompt_tokens = rate_limit::estimate_tokens(request);
    let estimated_completion_tokens = request.max_tokens.unwrap_or(0) as f64;
    match model_cache.entry(&resolved.provider, &resolved.native_id) {
        Some(entry) => {
            let prompt_cost = entry
                .pricing
                .input_per_million
                .map(|rate| estimated_prompt_tokens / 1_000_000.0 * rate)
                .unwrap_or(0.0);
            let completion_cost = entry
                .pricing
                .output_per_million
                .map(|rate| estimated_completion_tokens / 1_000_000.0 * rate)
                .unwrap_or(0.0);
            prompt_cost + completion_cost
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, ReasoningConfig};
    use crate::tenant::InMemoryTenantStore;
    use gateway_config::ModelRestriction;
    use model_catalog::{ModelCapabilities, ModelCatalogEntry, ModelPricing};
    use std::sync::Arc;

    fn request(model: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            system_prompt: None,
            messages: vec![Message::user("hello there")],
            tools: vec![],
            temperature: None,
            max_tokens: None,
            reasoning: ReasoningConfig::default(),
            stream: false,
        }
    }

    #[tokio::test]
    async fn all_stages_pass_with_a_permissive_policy() {
        let store = Arc::new(InMemoryTenantStore::new());
        let scope = TenantScope::new("t1", "key1", vec!["default".into()], store);
        let mut req = request("openai/gpt-4o");
        let policy = RolePolicy {
            id: "default".into(),
            ..RolePolicy::default()
        };
        let cache = ModelCache::new();
        let decisions = enforce(&scope, "default", &mut req, &[], &policy, &cache)
            .await
            .unwrap();
        assert_eq!(decisions.resolved_model.provider, "openai");
        assert_eq!(decisions.budget_alert, BudgetAlert::Ok);
    }

    #[tokio::test]
    async fn model_restriction_stage_runs_before_prompt_stage() {
        let store = Arc::new(InMemoryTenantStore::new());
        let scope = TenantScope::new("t1", "key1", vec!["default".into()], store);
        // A prompt long enough to fail stage 2 if it ran, paired with a
        // model restriction that must reject first.
        let mut req = request("openai/gpt-4o");
        req.messages = vec![Message::user("x".repeat(10_000))];
        let policy = RolePolicy {
            id: "default".into(),
            model_restriction: ModelRestriction {
                enabled: true,
                mode: Some(gateway_config::RestrictionMode::Blacklist),
                models: vec![],
                providers: vec!["openai".into()],
            },
            prompt: gateway_config::PromptPolicy {
                enabled: true,
                max_chars: Some(10),
                ..Default::default()
            },
            ..RolePolicy::default()
        };
        let cache = ModelCache::new();
        let err = enforce(&scope, "default", &mut req, &[], &policy, &cache)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ModelBlocked(_)));
    }

    #[tokio::test]
    async fn estimated_cost_feeds_budget_check() {
        let store = Arc::new(InMemoryTenantStore::new());
        let scope = TenantScope::new("t1", "key1", vec!["default".into()], store);
        let mut cache = ModelCache::new();
        cache.populate_provider(
            "openai",
            &[ModelCatalogEntry {
                user_id: "openai/gpt-4o".into(),
                native_id: "gpt-4o-native".into(),
                display_name: String::new(),
                provider: "openai".into(),
                capabilities: ModelCapabilities::default(),
                context_limit: None,
                output_limit: None,
                pricing: ModelPricing {
                    input_per_million: Some(1_000_000.0),
                    output_per_million: Some(1_000_000.0),
                },
            }],
        );
        let mut req = request("openai/gpt-4o");
        req.max_tokens = Some(1000);
        let policy = RolePolicy {
            id: "default".into(),
            budget: gateway_config::BudgetPolicy {
                enabled: true,
                per_request_usd: Some(1.0),
                ..Default::default()
            },
            ..RolePolicy::default()
        };
        let err = enforce(&scope, "default", &mut req, &[], &policy, &cache)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::BudgetPerRequestExceeded));
    }
}
