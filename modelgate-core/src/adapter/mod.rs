//! The provider adapter layer (§4.2): one translator per vendor wire
//! protocol, behind a single capability contract.
//!
//! A closed variant set, not an inheritance hierarchy (§9 "Heterogeneous
//! adapters") — [`AdapterRegistry`] maps a provider tag to a factory that is
//! a pure function of a [`ProviderConfig`]. Every adapter is constructed
//! once per `(tenant, provider)` pair and reused; the model cache it holds
//! is replaced wholesale on invalidation (§4.5, §5 "per-tenant adapter
//! cache").

pub mod anthropic;
pub mod bedrock;
pub mod gemini;
pub mod openai;
mod sigv4;
mod sse;

use std::pin::Pin;
use std::sync::RwLock;

use async_trait::async_trait;
use futures::Stream;
use gateway_config::{ProviderConfig, ProviderFamily};
use model_catalog::{ModelCache, ModelCatalogEntry};

use crate::credential::PlaintextCredential;
use crate::error::GatewayError;
use crate::message::{ChatRequest, ChatResponse, ContentBlock, Message, Role};
use gateway_protocol::InternalEvent;

/// A finite, single-producer, single-consumer sequence of [`InternalEvent`]s
/// (§3, §5). Adapters build this over a bounded `tokio::sync::mpsc` channel
/// (~100 elements, §5) so a slow consumer applies backpressure to the
/// parser rather than buffering the whole response in memory.
pub type EventStream = Pin<Box<dyn Stream<Item = InternalEvent> + Send>>;

/// Capacity of the bounded channel every streaming adapter feeds (§5).
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

/// The capability contract every vendor adapter implements (§4.2).
///
/// `embed` defaults to a typed "not supported" error so adapters that have
/// no embeddings endpoint don't need to implement it; `list_models`
/// defaults to an empty catalog for vendors with no listing endpoint;
/// `count_tokens` defaults to the `chars/4` fallback (§9).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The provider tag this adapter was constructed for, e.g. `"openai"`.
    fn provider(&self) -> &str;

    fn family(&self) -> ProviderFamily;

    /// Whether `id` (already resolved to this adapter's native-id space) is
    /// one this adapter can serve. The default accepts anything — adapters
    /// backed by a fixed catalog should override.
    fn supports_model(&self, _id: &str) -> bool {
        true
    }

    /// Buffered chat completion: the whole response arrives at once with
    /// usage and finish reason populated.
    async fn chat_complete(
        &self,
        credential: &PlaintextCredential,
        request: &ChatRequest,
    ) -> Result<ChatResponse, GatewayError>;

    /// Lazy streamed chat completion (§3, §5). The producer closes the
    /// channel immediately after emitting `InternalEvent::Finish`.
    async fn chat_stream(
        &self,
        credential: &PlaintextCredential,
        request: &ChatRequest,
    ) -> Result<EventStream, GatewayError>;

    async fn embed(
        &self,
        _credential: &PlaintextCredential,
        _model: &str,
        _texts: &[String],
        _dimensions: Option<usize>,
    ) -> Result<(Vec<Vec<f32>>, u32), GatewayError> {
        Err(GatewayError::ProviderError(format!(
            "{} does not support embeddings",
            self.provider()
        )))
    }

    async fn list_models(
        &self,
        _credential: &PlaintextCredential,
    ) -> Result<Vec<ModelCatalogEntry>, GatewayError> {
        Ok(Vec::new())
    }

    /// `chars/4` fallback token count (§9); adapters with a vendor
    /// tokenizer may override.
    fn count_tokens(&self, request: &ChatRequest) -> u32 {
        (request.total_chars() as f64 / 4.0).ceil() as u32
    }

    fn set_model_cache(&self, cache: ModelCache);

    fn get_model_cache(&self) -> ModelCache;
}

/// Shared `RwLock<ModelCache>` storage every adapter embeds so
/// `set_model_cache`/`get_model_cache` have an identical, boring
/// implementation across vendors (§4.2, §4.5).
#[derive(Default)]
pub(crate) struct ModelCacheCell(RwLock<ModelCache>);

impl ModelCacheCell {
    pub(crate) fn set(&self, cache: ModelCache) {
        *self.0.write().unwrap() = cache;
    }

    pub(crate) fn get(&self) -> ModelCache {
        self.0.read().unwrap().clone()
    }
}

/// Maps a provider tag to a factory function of a [`ProviderConfig`] (§9).
/// Construction is pure: no I/O, no credential material — credentials are
/// supplied per-call, scoped to that call (§4.3, §9 "Credential plaintext
/// lifetime").
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: std::collections::HashMap<String, std::sync::Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one adapter per entry in `configs`, via the factory matching
    /// its `family`.
    pub fn from_configs(configs: &[ProviderConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs {
            registry.insert(build(config));
        }
        registry
    }

    pub fn insert(&mut self, adapter: std::sync::Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider().to_string(), adapter);
    }

    pub fn get(&self, provider: &str) -> Option<std::sync::Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider).cloned()
    }
}

/// Builds the one adapter instance for `config`'s family. Exposed so the
/// dispatcher can build its own per-`(tenant, provider)` adapter instances
/// (§5 "Per-tenant adapter cache") rather than sharing a single process-wide
/// instance across tenants.
pub fn build_adapter(config: &ProviderConfig) -> std::sync::Arc<dyn ProviderAdapter> {
    build(config)
}

fn build(config: &ProviderConfig) -> std::sync::Arc<dyn ProviderAdapter> {
    match config.family {
        ProviderFamily::Openai => std::sync::Arc::new(openai::OpenAiAdapter::new(config.clone())),
        ProviderFamily::Anthropic => {
            std::sync::Arc::new(anthropic::AnthropicAdapter::new(config.clone()))
        }
        ProviderFamily::Gemini => std::sync::Arc::new(gemini::GeminiAdapter::new(config.clone())),
        ProviderFamily::Bedrock => std::sync::Arc::new(bedrock::BedrockAdapter::new(config.clone())),
    }
}

/// The "Gemini pattern" (§4.2): adapters without a native `system` role
/// inject the system prompt as a leading user turn followed by a scripted
/// assistant acknowledgement, so every downstream role-mapping step only
/// ever sees `{user, assistant, tool}`.
pub(crate) fn inject_system_as_leading_turn(
    system_prompt: Option<&str>,
    messages: &[Message],
) -> Vec<Message> {
    let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) else {
        return messages.to_vec();
    };
    let mut out = Vec::with_capacity(messages.len() + 2);
    out.push(Message::user(prompt));
    out.push(Message::assistant("Understood."));
    out.extend_from_slice(messages);
    out
}

/// The "Anthropic/Bedrock Converse pattern" (§4.2): vendors that require
/// tool results inside a user turn get every run of consecutive
/// `Role::Tool` messages folded into a single user message carrying one
/// `ToolResult` content block per input message, preserving the
/// `tool_call_id` binding.
pub(crate) fn fold_tool_results_into_user_turns(messages: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    let mut i = 0;
    while i < messages.len() {
        if messages[i].role == Role::Tool {
            let mut content = Vec::new();
            while i < messages.len() && messages[i].role == Role::Tool {
                let msg = &messages[i];
                content.push(ContentBlock::ToolResult {
                    tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.text(),
                });
                i += 1;
            }
            out.push(Message {
                role: Role::User,
                content,
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        } else {
            out.push(messages[i].clone());
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    #[test]
    fn system_prompt_becomes_leading_user_plus_acknowledgement() {
        let messages = vec![Message::user("hi")];
        let out = inject_system_as_leading_turn(Some("be terse"), &messages);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].role, Role::User);
        assert_eq!(out[0].text(), "be terse");
        assert_eq!(out[1].role, Role::Assistant);
        assert_eq!(out[2].text(), "hi");
    }

    #[test]
    fn empty_system_prompt_is_a_no_op() {
        let messages = vec![Message::user("hi")];
        let out = inject_system_as_leading_turn(Some(""), &messages);
        assert_eq!(out.len(), 1);
        let out = inject_system_as_leading_turn(None, &messages);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn consecutive_tool_results_fold_into_one_user_turn() {
        let messages = vec![
            Message {
                role: Role::Assistant,
                content: vec![],
                tool_calls: vec![ToolCall {
                    id: "call-1".into(),
                    name: "search".into(),
                    arguments: serde_json::json!({}),
                }],
                tool_call_id: None,
            },
            Message {
                role: Role::Tool,
                content: vec![ContentBlock::text("result one")],
                tool_calls: vec![],
                tool_call_id: Some("call-1".into()),
            },
            Message {
                role: Role::Tool,
                content: vec![ContentBlock::text("result two")],
                tool_calls: vec![],
                tool_call_id: Some("call-2".into()),
            },
            Message::assistant("done"),
        ];
        let out = fold_tool_results_into_user_turns(&messages);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].role, Role::User);
        assert_eq!(out[1].content.len(), 2);
        assert!(matches!(
            &out[1].content[0],
            ContentBlock::ToolResult { tool_call_id, .. } if tool_call_id == "call-1"
        ));
        assert!(matches!(
            &out[1].content[1],
            ContentBlock::ToolResult { tool_call_id, .. } if tool_call_id == "call-2"
        ));
    }
}
