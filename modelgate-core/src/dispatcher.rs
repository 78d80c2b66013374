//! The core dispatcher (§2 step 6, §4.5): the request-path entry point.
//!
//! Given a [`TenantScope`] and a [`ChatRequest`], `Dispatcher::dispatch`
//! loads the role's policy, runs the enforcement pipeline (§4.1), resolves
//! the model cache (§4.5), selects a credential (§4.3), and invokes the
//! resilience executor (§4.4) against a per-tenant adapter instance (§4.2,
//! §5 "Per-tenant adapter cache"). Everything else in this crate is the
//! machinery this one call wires together.

use std::sync::Arc;

use dashmap::DashMap;
use gateway_config::{ProviderConfig, ResiliencePolicy};
use model_catalog::ModelCache;

use crate::adapter::{build_adapter, EventStream, ProviderAdapter};
use crate::circuit::CircuitCache;
use crate::credential::{FailureKind, ProviderCredential};
use crate::error::GatewayError;
use crate::message::{ChatRequest, ChatResponse};
use crate::policy;
use crate::resilience;
use crate::selector::CredentialSelector;
use crate::tenant::TenantScope;
use crate::tool_catalog::ToolCatalogClient;

/// Either a buffered response or a lazy event stream, depending on
/// `request.stream` (§2, §4.2 `ChatComplete`/`ChatStream`).
pub enum DispatchOutcome {
    Buffered(ChatResponse),
    Stream(EventStream),
}

/// Classifies a `GatewayError` surfaced by an adapter call into the
/// `FailureKind` the credential selector's telemetry callbacks expect (§4.3,
/// §7 "the auth kind additionally disables the credential").
fn classify_failure(error: &GatewayError) -> FailureKind {
    let message = error.to_string().to_lowercase();
    if message.contains("401")
        || message.contains("403")
        || message.contains("unauthorized")
        || message.contains("forbidden")
        || message.contains("invalid api key")
        || message.contains("invalid_api_key")
    {
        FailureKind::Auth
    } else if message.contains("rate limit") || message.contains("429") {
        FailureKind::RateLimit
    } else {
        FailureKind::Generic
    }
}

/// The request-path core's single entry point (§2).
///
/// One `Dispatcher` is constructed per process and shared across every
/// tenant; the per-`(tenant, provider)` adapter instances and model caches
/// it lazily creates are the "per-tenant adapter cache" / "model-cache maps"
/// shared mutable state described in §5.
pub struct Dispatcher {
    provider_configs: Vec<ProviderConfig>,
    tenant_adapters: DashMap<(String, String), Arc<dyn ProviderAdapter>>,
    model_caches: DashMap<String, ModelCache>,
    loaded_providers: DashMap<(String, String), ()>,
    selector: CredentialSelector,
    circuit_cache: CircuitCache,
    tool_catalog: Arc<dyn ToolCatalogClient>,
    master_key: String,
}

impl Dispatcher {
    pub fn new(
        provider_configs: Vec<ProviderConfig>,
        master_key: impl Into<String>,
        tool_catalog: Arc<dyn ToolCatalogClient>,
    ) -> Self {
        Self {
            provider_configs,
            tenant_adapters: DashMap::new(),
            model_caches: DashMap::new(),
            loaded_providers: DashMap::new(),
            selector: CredentialSelector::new(),
            circuit_cache: CircuitCache::new(),
            tool_catalog,
            master_key: master_key.into(),
        }
    }

    /// The lazily-created, tenant-scoped adapter instance for `provider`
    /// (§5 "Init lifecycle: lazy-create on first use").
    fn adapter_for(&self, tenant: &str, provider: &str) -> Result<Arc<dyn ProviderAdapter>, GatewayError> {
        let key = (tenant.to_string(), provider.to_string());
        if let Some(existing) = self.tenant_adapters.get(&key) {
            return Ok(existing.clone());
        }
        let config = self
            .provider_configs
            .iter()
            .find(|c| c.provider == provider)
            .ok_or_else(|| GatewayError::ProviderError(format!("unknown provider '{provider}'")))?;
        let adapter = build_adapter(config);
        self.tenant_adapters.insert(key, adapter.clone());
        Ok(adapter)
    }

    /// Ensures every configured provider's alias table has been loaded at
    /// least once for this tenant (§4.5 "(a) reading the tenant database's
    /// `available_models` table"), then returns a clone of the tenant's
    /// current model cache. A provider with no rows in the tenant database
    /// simply contributes no aliases; resolution falls back to the bare
    /// native id (§4.5, model cache is advisory, never a hard gate).
    async fn ensure_model_cache(&self, scope: &TenantScope) -> ModelCache {
        for config in &self.provider_configs {
            let key = (scope.tenant_id.clone(), config.provider.clone());
            if self.loaded_providers.contains_key(&key) {
                continue;
            }
            if let Ok(entries) = scope
                .port()
                .load_available_models(&scope.tenant_id, &config.provider)
                .await
            {
                if !entries.is_empty() {
                    self.model_caches
                        .entry(scope.tenant_id.clone())
                        .or_default()
                        .populate_provider(&config.provider, &entries);
                }
            }
            self.loaded_providers.insert(key, ());
        }
        self.model_caches
            .entry(scope.tenant_id.clone())
            .or_default()
            .clone()
    }

    /// Refreshes one provider's alias table from that adapter's own
    /// `ListModels` call (§4.5 "(b) refreshing from an adapter's
    /// `ListModels` call"), for vendors with a catalog endpoint or a
    /// hand-curated fallback.
    pub async fn refresh_model_cache_from_adapter(
        &self,
        scope: &TenantScope,
        provider: &str,
        credential: &ProviderCredential,
    ) -> Result<(), GatewayError> {
        let adapter = self.adapter_for(&scope.tenant_id, provider)?;
        let plaintext = credential.reveal(&self.master_key)?;
        let entries = adapter.list_models(&plaintext).await?;
        self.model_caches
            .entry(scope.tenant_id.clone())
            .or_default()
            .populate_provider(provider, &entries);
        self.loaded_providers
            .insert((scope.tenant_id.clone(), provider.to_string()), ());
        Ok(())
    }

    /// Whole-tenant or per-`(tenant, provider)` cache invalidation (§4.5
    /// "Invalidation"), called when credentials or catalog rows change.
    /// Every adapter that implements the cache-receiving capability has its
    /// table replaced wholesale the next time `dispatch` runs.
    pub fn invalidate_model_cache(&self, tenant: &str, provider: Option<&str>) {
        match provider {
            Some(provider) => {
                if let Some(mut cache) = self.model_caches.get_mut(tenant) {
                    cache.invalidate_provider(provider);
                }
                self.loaded_providers
                    .remove(&(tenant.to_string(), provider.to_string()));
            }
            None => {
                self.model_caches.remove(tenant);
                self.loaded_providers.retain(|(t, _), _| t != tenant);
            }
        }
    }

    /// Resolves any of `requested_tool_names` not already carried inline on
    /// `request.tools` against the MCP tool-catalog client (§1 "the core is
    /// a client of this surface only when resolving tool catalogs").
    async fn resolve_tool_catalog(
        &self,
        scope: &TenantScope,
        request: &mut ChatRequest,
        requested_tool_names: &[String],
    ) -> Result<(), GatewayError> {
        let missing: Vec<&String> = requested_tool_names
            .iter()
            .filter(|name| !request.tools.iter().any(|t| &&t.name == name))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let catalog = self.tool_catalog.list_tools(&scope.tenant_id).await?;
        for name in missing {
            if let Some(spec) = catalog.iter().find(|t| &t.name == name) {
                request.tools.push(spec.clone());
            }
        }
        Ok(())
    }

    /// Runs enforcement and resolves everything the executor needs, without
    /// making the provider call. Shared by [`Self::dispatch`] and
    /// [`Self::embed`].
    async fn prepare(
        &self,
        scope: &TenantScope,
        role: &str,
        request: &mut ChatRequest,
        requested_tool_names: &[String],
    ) -> Result<(policy::PolicyDecisions, ModelCache), GatewayError> {
        let role_policy = scope
            .port()
            .load_role_policy(&scope.tenant_id, role)
            .await?
            .ok_or(GatewayError::NoPolicyConfigured)?;

        self.resolve_tool_catalog(scope, request, requested_tool_names).await?;

        let model_cache = self.ensure_model_cache(scope).await;

        let decisions = policy::enforce(
            scope,
            role,
            request,
            requested_tool_names,
            &role_policy,
            &model_cache,
        )
        .await?;

        Ok((decisions, model_cache))
    }

    /// The request-path entry point (§2 step 6, §4). Runs enforcement,
    /// resolves model and provider, acquires a credential, invokes the
    /// resilience executor, and returns either a buffered response or a
    /// normalised event stream.
    pub async fn dispatch(
        &self,
        scope: &TenantScope,
        role: &str,
        mut request: ChatRequest,
        requested_tool_names: &[String],
    ) -> Result<DispatchOutcome, GatewayError> {
        let (decisions, model_cache) = self
            .prepare(scope, role, &mut request, requested_tool_names)
            .await?;

        let provider = decisions.resolved_model.provider.clone();
        let resilience_policy = decisions.resilience.clone();

        if request.stream {
            let stream = self
                .dispatch_stream(scope, &provider, &resilience_policy, &model_cache, &request)
                .await?;
            Ok(DispatchOutcome::Stream(stream))
        } else {
            let response = self
                .dispatch_buffered(scope, &provider, &resilience_policy, &model_cache, &request)
                .await?;
            Ok(DispatchOutcome::Buffered(response))
        }
    }

    async fn dispatch_buffered(
        &self,
        scope: &TenantScope,
        provider: &str,
        resilience_policy: &ResiliencePolicy,
        model_cache: &ModelCache,
        request: &ChatRequest,
    ) -> Result<ChatResponse, GatewayError> {
        let primary_adapter = self.adapter_for(&scope.tenant_id, provider)?;
        primary_adapter.set_model_cache(model_cache.clone());
        let primary_credential = self
            .selector
            .select(scope, provider, primary_adapter.family())
            .await?;
        let primary_plaintext = primary_credential.reveal(&self.master_key)?;

        resilience::execute(
            scope,
            &self.circuit_cache,
            provider,
            resilience_policy,
            || async {
                match primary_adapter.chat_complete(&primary_plaintext, request).await {
                    Ok(response) => {
                        self.selector
                            .record_success(scope, &primary_credential, None, None)
                            .await;
                        Ok(response)
                    }
                    Err(error) => {
                        self.record_provider_failure(scope, &primary_credential, &error).await;
                        Err(error)
                    }
                }
            },
            |entry| async move {
                let fb_adapter = self.adapter_for(&scope.tenant_id, &entry.provider)?;
                fb_adapter.set_model_cache(model_cache.clone());
                let fb_credential = self
                    .selector
                    .select(scope, &entry.provider, fb_adapter.family())
                    .await?;
                let fb_plaintext = fb_credential.reveal(&self.master_key)?;
                let mut fb_request = request.clone();
                fb_request.model = entry.model.clone();
                match fb_adapter.chat_complete(&fb_plaintext, &fb_request).await {
                    Ok(response) => {
                        self.selector
                            .record_success(scope, &fb_credential, None, None)
                            .await;
                        Ok(response)
                    }
                    Err(error) => {
                        self.record_provider_failure(scope, &fb_credential, &error).await;
                        Err(error)
                    }
                }
            },
        )
        .await
    }

    /// Streaming counterpart of [`Self::dispatch_buffered`]. Retry and
    /// fallback apply only to *establishing* the stream (the adapter's
    /// initial request/response handshake); once `chat_stream` returns a
    /// stream, errors surfacing mid-stream become `PolicyViolation` +
    /// `Finish{Error}` events inside it and are never retried (§4.2
    /// "Errors", §7 "mid-stream errors").
    async fn dispatch_stream(
        &self,
        scope: &TenantScope,
        provider: &str,
        resilience_policy: &ResiliencePolicy,
        model_cache: &ModelCache,
        request: &ChatRequest,
    ) -> Result<EventStream, GatewayError> {
        let primary_adapter = self.adapter_for(&scope.tenant_id, provider)?;
        primary_adapter.set_model_cache(model_cache.clone());
        let primary_credential = self
            .selector
            .select(scope, provider, primary_adapter.family())
            .await?;
        let primary_plaintext = primary_credential.reveal(&self.master_key)?;

        resilience::execute(
            scope,
            &self.circuit_cache,
            provider,
            resilience_policy,
            || async {
                match primary_adapter.chat_stream(&primary_plaintext, request).await {
                    Ok(stream) => {
                        self.selector
                            .record_success(scope, &primary_credential, None, None)
                            .await;
                        Ok(stream)
                    }
                    Err(error) => {
                        self.record_provider_failure(scope, &primary_credential, &error).await;
                        Err(error)
                    }
                }
            },
            |entry| async move {
                let fb_adapter = self.adapter_for(&scope.tenant_id, &entry.provider)?;
                fb_adapter.set_model_cache(model_cache.clone());
                let fb_credential = self
                    .selector
                    .select(scope, &entry.provider, fb_adapter.family())
                    .await?;
                let fb_plaintext = fb_credential.reveal(&self.master_key)?;
                let mut fb_request = request.clone();
                fb_request.model = entry.model.clone();
                match fb_adapter.chat_stream(&fb_plaintext, &fb_request).await {
                    Ok(stream) => {
                        self.selector
                            .record_success(scope, &fb_credential, None, None)
                            .await;
                        Ok(stream)
                    }
                    Err(error) => {
                        self.record_provider_failure(scope, &fb_credential, &error).await;
                        Err(error)
                    }
                }
            },
        )
        .await
    }

    /// Embeddings entry point (§4.2 `Embed`, §6 `/v1/embeddings`). Runs the
    /// same model-restriction + rate-limit + budget checks as a chat
    /// request (prompt/tool stages are meaningless for an embedding batch
    /// and are skipped by constructing a tool-free, single-message stand-in
    /// request purely for enforcement bookkeeping); adapters without an
    /// embeddings endpoint surface a typed `provider_error`.
    pub async fn embed(
        &self,
        scope: &TenantScope,
        role: &str,
        model: &str,
        texts: Vec<String>,
        dimensions: Option<usize>,
    ) -> Result<(Vec<Vec<f32>>, u32), GatewayError> {
        let mut enforcement_request = ChatRequest {
            model: model.to_string(),
            system_prompt: None,
            messages: vec![crate::message::Message::user(texts.join("\n"))],
            tools: vec![],
            temperature: None,
            max_tokens: None,
            reasoning: crate::message::ReasoningConfig::default(),
            stream: false,
        };
        let (decisions, _model_cache) = self
            .prepare(scope, role, &mut enforcement_request, &[])
            .await?;

        let provider = decisions.resolved_model.provider.clone();
        let adapter = self.adapter_for(&scope.tenant_id, &provider)?;
        let credential = self.selector.select(scope, &provider, adapter.family()).await?;
        let plaintext = credential.reveal(&self.master_key)?;

        match adapter
            .embed(&plaintext, &decisions.resolved_model.native_id, &texts, dimensions)
            .await
        {
            Ok(result) => {
                self.selector.record_success(scope, &credential, None, None).await;
                Ok(result)
            }
            Err(error) => {
                self.record_provider_failure(scope, &credential, &error).await;
                Err(error)
            }
        }
    }

    /// `RecordFailure` telemetry, plus `DisableKey` when the failure
    /// classifies as an auth error (§4.3).
    async fn record_provider_failure(
        &self,
        scope: &TenantScope,
        credential: &ProviderCredential,
        error: &GatewayError,
    ) {
        let kind = classify_failure(error);
        self.selector.record_failure(scope, credential, kind).await;
        if kind == FailureKind::Auth {
            self.selector.disable_key(scope, credential).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ModelCacheCell;
    use crate::credential::CredentialKind;
    use crate::message::{Message, ReasoningConfig, ToolCall};
    use crate::tenant::InMemoryTenantStore;
    use crate::tool_catalog::NoopToolCatalogClient;
    use async_trait::async_trait;
    use gateway_config::{ProviderFamily, RolePolicy};
    use gateway_protocol::{FinishReason, InternalEvent};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A test-double adapter whose `chat_complete` fails a fixed number of
    /// times before succeeding, so retry/fallback wiring can be exercised
    /// without a live HTTP server.
    struct ScriptedAdapter {
        provider: String,
        family: ProviderFamily,
        failures_before_success: AtomicU32,
        calls: AtomicU32,
        cache: ModelCacheCell,
    }

    impl ScriptedAdapter {
        fn new(provider: &str, family: ProviderFamily, failures_before_success: u32) -> Self {
            Self {
                provider: provider.to_string(),
                family,
                failures_before_success: AtomicU32::new(failures_before_success),
                calls: AtomicU32::new(0),
                cache: ModelCacheCell::default(),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn provider(&self) -> &str {
            &self.provider
        }

        fn family(&self) -> ProviderFamily {
            self.family
        }

        async fn chat_complete(
            &self,
            _credential: &crate::credential::PlaintextCredential,
            request: &ChatRequest,
        ) -> Result<ChatResponse, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
                return Err(GatewayError::ProviderError("upstream 503".into()));
            }
            Ok(ChatResponse {
                model: request.model.clone(),
                content: format!("reply from {}", self.provider),
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
                usage: None,
            })
        }

        async fn chat_stream(
            &self,
            _credential: &crate::credential::PlaintextCredential,
            _request: &ChatRequest,
        ) -> Result<EventStream, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success.fetch_sub(1, Ordering::SeqCst);
                return Err(GatewayError::ProviderError("upstream 503".into()));
            }
            let (tx, rx) = tokio::sync::mpsc::channel(8);
            let provider = self.provider.clone();
            tokio::spawn(async move {
                let _ = tx
                    .send(InternalEvent::TextChunk {
                        text: format!("hi from {provider}"),
                    })
                    .await;
                let _ = tx.send(InternalEvent::Finish { reason: FinishReason::Stop }).await;
            });
            Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
        }

        fn set_model_cache(&self, cache: ModelCache) {
            self.cache.set(cache)
        }

        fn get_model_cache(&self) -> ModelCache {
            self.cache.get()
        }
    }

    fn provider_config(provider: &str) -> ProviderConfig {
        ProviderConfig {
            provider: provider.to_string(),
            family: ProviderFamily::Openai,
            base_url: "http://unused.invalid".into(),
            default_timeout_secs: 1,
        }
    }

    fn credential(id: &str, provider: &str) -> ProviderCredential {
        ProviderCredential {
            id: id.into(),
            provider: provider.into(),
            kind: CredentialKind::BearerKey,
            encrypted_bearer_key: Some(crate::credential::encrypt_secret("mk", "sk-test").unwrap()),
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
        }
    }

    fn scope_with_credentials(providers: &[&str]) -> (Arc<InMemoryTenantStore>, TenantScope) {
        let store = Arc::new(InMemoryTenantStore::new());
        store.set_role_policy("t1", "default", RolePolicy {
            id: "default".into(),
            ..RolePolicy::default()
        });
        for provider in providers {
            store.set_credentials("t1", provider, vec![credential(&format!("{provider}-key"), provider)]);
        }
        let scope = TenantScope::new("t1", "key1", vec!["default".into()], store.clone());
        (store, scope)
    }

    fn request(model: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            system_prompt: None,
            messages: vec![Message::user("hello")],
            tools: vec![],
            temperature: None,
            max_tokens: None,
            reasoning: ReasoningConfig::default(),
            stream: false,
        }
    }

    #[tokio::test]
    async fn buffered_dispatch_succeeds_against_the_primary_provider() {
        let (_store, scope) = scope_with_credentials(&["openai"]);
        let dispatcher = Dispatcher::new(
            vec![provider_config("openai")],
            "mk",
            Arc::new(NoopToolCatalogClient),
        );
        dispatcher.tenant_adapters.insert(
            ("t1".into(), "openai".into()),
            Arc::new(ScriptedAdapter::new("openai", ProviderFamily::Openai, 0)),
        );

        let outcome = dispatcher
            .dispatch(&scope, "default", request("openai/gpt-4o"), &[])
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::Buffered(response) => {
                assert_eq!(response.content, "reply from openai");
            }
            DispatchOutcome::Stream(_) => panic!("expected a buffered response"),
        }
    }

    #[tokio::test]
    async fn buffered_dispatch_retries_then_succeeds_without_fallback() {
        let store = Arc::new(InMemoryTenantStore::new());
        store.set_role_policy(
            "t1",
            "default",
            RolePolicy {
                id: "default".into(),
                resilience: gateway_config::ResiliencePolicy {
                    retry_enabled: true,
                    max_retries: 3,
                    base_backoff_ms: 1,
                    max_backoff_ms: 2,
                    jitter: false,
                    ..gateway_config::ResiliencePolicy::default()
                },
                ..RolePolicy::default()
            },
        );
        store.set_credentials("t1", "openai", vec![credential("openai-key", "openai")]);
        let scope = TenantScope::new("t1", "key1", vec!["default".into()], store);

        let dispatcher = Dispatcher::new(
            vec![provider_config("openai")],
            "mk",
            Arc::new(NoopToolCatalogClient),
        );
        dispatcher.tenant_adapters.insert(
            ("t1".into(), "openai".into()),
            Arc::new(ScriptedAdapter::new("openai", ProviderFamily::Openai, 2)),
        );

        let outcome = dispatcher
            .dispatch(&scope, "default", request("openai/gpt-4o"), &[])
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Buffered(_)));

        let stored = scope.port().load_credentials("t1", "openai").await.unwrap();
        assert!(
            stored[0].health < 1.0,
            "two recorded failures should have cost health"
        );
    }

    #[tokio::test]
    async fn buffered_dispatch_falls_back_when_primary_is_exhausted() {
        let (_store, scope) = scope_with_credentials(&["openai", "anthropic"]);
        _store.set_role_policy(
            "t1",
            "default",
            RolePolicy {
                id: "default".into(),
                resilience: gateway_config::ResiliencePolicy {
                    fallback_enabled: true,
                    fallback_chain: vec![gateway_config::FallbackEntry {
                        provider: "anthropic".into(),
                        model: "claude-3-5-sonnet".into(),
                        priority: 0,
                        timeout_secs: 5,
                    }],
                    ..gateway_config::ResiliencePolicy::default()
                },
                ..RolePolicy::default()
            },
        );

        let dispatcher = Dispatcher::new(
            vec![provider_config("openai"), provider_config("anthropic")],
            "mk",
            Arc::new(NoopToolCatalogClient),
        );
        dispatcher.tenant_adapters.insert(
            ("t1".into(), "openai".into()),
            Arc::new(ScriptedAdapter::new("openai", ProviderFamily::Openai, u32::MAX)),
        );
        dispatcher.tenant_adapters.insert(
            ("t1".into(), "anthropic".into()),
            Arc::new(ScriptedAdapter::new("anthropic", ProviderFamily::Anthropic, 0)),
        );

        let outcome = dispatcher
            .dispatch(&scope, "default", request("openai/gpt-4o"), &[])
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::Buffered(response) => {
                assert_eq!(response.content, "reply from anthropic");
            }
            DispatchOutcome::Stream(_) => panic!("expected a buffered response"),
        }
    }

    #[tokio::test]
    async fn streaming_dispatch_drains_to_a_terminal_finish_event() {
        let (_store, scope) = scope_with_credentials(&["openai"]);
        let dispatcher = Dispatcher::new(
            vec![provider_config("openai")],
            "mk",
            Arc::new(NoopToolCatalogClient),
        );
        dispatcher.tenant_adapters.insert(
            ("t1".into(), "openai".into()),
            Arc::new(ScriptedAdapter::new("openai", ProviderFamily::Openai, 0)),
        );

        let mut req = request("openai/gpt-4o");
        req.stream = true;
        let outcome = dispatcher.dispatch(&scope, "default", req, &[]).await.unwrap();
        let DispatchOutcome::Stream(mut stream) = outcome else {
            panic!("expected a stream")
        };
        use futures::StreamExt;
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        assert!(matches!(events.last(), Some(InternalEvent::Finish { .. })));
    }

    #[tokio::test]
    async fn missing_role_policy_is_refused_not_silently_allowed() {
        let store = Arc::new(InMemoryTenantStore::new());
        let scope = TenantScope::new("t1", "key1", vec!["default".into()], store);
        let dispatcher = Dispatcher::new(vec![provider_config("openai")], "mk", Arc::new(NoopToolCatalogClient));
        let err = dispatcher
            .dispatch(&scope, "default", request("openai/gpt-4o"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoPolicyConfigured));
    }

    #[tokio::test]
    async fn requested_tool_not_on_catalog_is_ignored_not_fabricated() {
        let (_store, scope) = scope_with_credentials(&["openai"]);
        let dispatcher = Dispatcher::new(vec![provider_config("openai")], "mk", Arc::new(NoopToolCatalogClient));
        dispatcher.tenant_adapters.insert(
            ("t1".into(), "openai".into()),
            Arc::new(ScriptedAdapter::new("openai", ProviderFamily::Openai, 0)),
        );
        let mut req = request("openai/gpt-4o");
        req.messages.push(Message {
            role: crate::message::Role::Assistant,
            content: vec![],
            tool_calls: vec![ToolCall {
                id: "call-1".into(),
                name: "search".into(),
                arguments: serde_json::json!({}),
            }],
            tool_call_id: None,
        });
        let outcome = dispatcher
            .dispatch(&scope, "default", req, &["search".to_string()])
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Buffered(_)));
    }
}
