//! The OpenAI adapter (§4.2.1): also backs any OpenAI-compatible third
//! party (Groq, Together, vLLM, ...) through a custom `base_url` — the wire
//! shape is identical, only the host and the model namespace differ.

use async_trait::async_trait;
use gateway_config::{ProviderConfig, ProviderFamily};
use model_catalog::{ModelCache, ModelCatalogEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::sse::{data_lines, error_body, http_error};
use super::{EventStream, ModelCacheCell, ProviderAdapter, STREAM_CHANNEL_CAPACITY};
use crate::credential::PlaintextCredential;
use crate::error::GatewayError;
use crate::message::{ChatRequest, ChatResponse, ContentBlock, Message, Role, ToolCall, ToolSpec};
use gateway_protocol::{FinishReason, InternalEvent, Usage};

pub struct OpenAiAdapter {
    config: ProviderConfig,
    client: reqwest::Client,
    cache: ModelCacheCell,
}

impl OpenAiAdapter {
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.default_timeout_secs))
            .build()
            .expect("static reqwest client config is valid");
        Self {
            config,
            client,
            cache: ModelCacheCell::default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth(&self, credential: &PlaintextCredential) -> Result<String, GatewayError> {
        credential
            .bearer_key
            .clone()
            .ok_or(GatewayError::CredentialDecryptFailed)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::Openai
    }

    async fn chat_complete(
        &self,
        credential: &PlaintextCredential,
        request: &ChatRequest,
    ) -> Result<ChatResponse, GatewayError> {
        let (_, native_id) = request.split_model();
        let body = build_request(native_id, request, false);
        let resp = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(self.auth(credential)?)
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        if !resp.status().is_success() {
            return Err(GatewayError::ProviderError(error_body(resp).await));
        }
        let raw: ChatCompletionResponse = resp.json().await.map_err(http_error)?;
        Ok(to_chat_response(native_id, raw))
    }

    async fn chat_stream(
        &self,
        credential: &PlaintextCredential,
        request: &ChatRequest,
    ) -> Result<EventStream, GatewayError> {
        let (_, native_id) = request.split_model();
        let body = build_request(native_id, request, true);
        let resp = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(self.auth(credential)?)
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        if !resp.status().is_success() {
            return Err(GatewayError::ProviderError(error_body(resp).await));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut lines = Box::pin(data_lines(resp));
            let mut usage: Option<Usage> = None;
            let mut finish = FinishReason::Stop;
            let mut tool_names: std::collections::HashMap<u32, String> = Default::default();
            use futures::StreamExt;
            while let Some(line) = lines.next().await {
                let Ok(chunk) = serde_json::from_str::<StreamChunk>(&line) else {
                    continue;
                };
                if let Some(u) = chunk.usage {
                    usage = Some(Usage {
                        prompt_tokens: u.prompt_tokens,
                        completion_tokens: u.completion_tokens,
                        total_tokens: u.total_tokens,
                        cost_usd: None,
                    });
                }
                let Some(choice) = chunk.choices.into_iter().next() else {
                    continue;
                };
                if let Some(reason) = choice.finish_reason.as_deref() {
                    finish = map_finish_reason(reason);
                }
                let delta = choice.delta;
                if let Some(text) = delta.content {
                    if !text.is_empty() && tx.send(InternalEvent::TextChunk { text }).await.is_err() {
                        return;
                    }
                }
                for tc in delta.tool_calls.unwrap_or_default() {
                    let id = tc
                        .id
                        .clone()
                        .unwrap_or_else(|| tool_names.get(&tc.index).cloned().unwrap_or_default());
                    if let Some(name) = tc.function.as_ref().and_then(|f| f.name.clone()) {
                        tool_names.insert(tc.index, id.clone());
                        if tx
                            .send(InternalEvent::ToolCallEvent {
                                id: id.clone(),
                                name,
                                arguments: Value::Null,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    if let Some(args) = tc.function.and_then(|f| f.arguments) {
                        if tx
                            .send(InternalEvent::ToolCallDelta {
                                id,
                                arguments_fragment: args,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            if let Some(usage) = usage {
                let _ = tx.send(InternalEvent::Usage { usage }).await;
            }
            let _ = tx.send(InternalEvent::Finish { reason: finish }).await;
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    async fn embed(
        &self,
        credential: &PlaintextCredential,
        model: &str,
        texts: &[String],
        dimensions: Option<usize>,
    ) -> Result<(Vec<Vec<f32>>, u32), GatewayError> {
        let body = EmbeddingRequest {
            model: model.to_string(),
            input: texts.to_vec(),
            dimensions,
        };
        let resp = self
            .client
            .post(self.url("/embeddings"))
            .bearer_auth(self.auth(credential)?)
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        if !resp.status().is_success() {
            return Err(GatewayError::ProviderError(error_body(resp).await));
        }
        let raw: EmbeddingResponse = resp.json().await.map_err(http_error)?;
        let vectors = raw.data.into_iter().map(|d| d.embedding).collect();
        Ok((vectors, raw.usage.total_tokens))
    }

    async fn list_models(
        &self,
        credential: &PlaintextCredential,
    ) -> Result<Vec<ModelCatalogEntry>, GatewayError> {
        let resp = self
            .client
            .get(self.url("/models"))
            .bearer_auth(self.auth(credential)?)
            .send()
            .await
            .map_err(http_error)?;
        if !resp.status().is_success() {
            return Err(GatewayError::ProviderError(error_body(resp).await));
        }
        let raw: ModelsResponse = resp.json().await.map_err(http_error)?;
        let provider = self.config.provider.clone();
        Ok(raw
            .data
            .into_iter()
            .map(|m| ModelCatalogEntry {
                user_id: format!("{provider}/{}", m.id),
                native_id: m.id.clone(),
                display_name: m.id,
                provider: provider.clone(),
                capabilities: model_catalog::ModelCapabilities::default(),
                context_limit: None,
                output_limit: None,
                pricing: model_catalog::ModelPricing::default(),
            })
            .collect())
    }

    fn set_model_cache(&self, cache: ModelCache) {
        self.cache.set(cache);
    }

    fn get_model_cache(&self) -> ModelCache {
        self.cache.get()
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        _ => FinishReason::Error,
    }
}

fn to_chat_response(native_id: &str, raw: ChatCompletionResponse) -> ChatResponse {
    let choice = raw.choices.into_iter().next().unwrap_or_default();
    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Null),
        })
        .collect();
    ChatResponse {
        model: native_id.to_string(),
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason: choice
            .finish_reason
            .as_deref()
            .map(map_finish_reason)
            .unwrap_or(FinishReason::Stop),
        usage: raw.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
            cost_usd: None,
        }),
    }
}

pub(crate) fn build_request(model: &str, request: &ChatRequest, stream: bool) -> Value {
    let mut messages: Vec<Value> = Vec::new();
    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        messages.push(serde_json::json!({"role": "system", "content": system}));
    }
    for m in &request.messages {
        messages.push(message_to_json(m));
    }

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    });
    let obj = body.as_object_mut().unwrap();
    if let Some(t) = request.temperature {
        obj.insert("temperature".into(), serde_json::json!(t));
    }
    if let Some(max_tokens) = request.max_tokens {
        obj.insert("max_tokens".into(), serde_json::json!(max_tokens));
    }
    if !request.tools.is_empty() {
        obj.insert(
            "tools".into(),
            serde_json::json!(request.tools.iter().map(tool_to_json).collect::<Vec<_>>()),
        );
    }
    if stream {
        obj.insert(
            "stream_options".into(),
            serde_json::json!({"include_usage": true}),
        );
    }
    body
}

fn tool_to_json(tool: &ToolSpec) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn message_to_json(m: &Message) -> Value {
    match m.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
            "content": m.text(),
        }),
        Role::Assistant if !m.tool_calls.is_empty() => serde_json::json!({
            "role": "assistant",
            "content": if m.text().is_empty() { Value::Null } else { Value::String(m.text()) },
            "tool_calls": m.tool_calls.iter().map(|tc| serde_json::json!({
                "id": tc.id,
                "type": "function",
                "function": {"name": tc.name, "arguments": tc.arguments.to_string()},
            })).collect::<Vec<_>>(),
        }),
        Role::System => serde_json::json!({"role": "system", "content": m.text()}),
        Role::User => serde_json::json!({"role": "user", "content": content_blocks_to_json(&m.content)}),
        Role::Assistant => serde_json::json!({"role": "assistant", "content": m.text()}),
    }
}

fn content_blocks_to_json(blocks: &[ContentBlock]) -> Value {
    if blocks.len() == 1 {
        if let Some(text) = blocks[0].as_text() {
            return Value::String(text.to_string());
        }
    }
    Value::Array(
        blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => {
                    serde_json::json!({"type": "text", "text": text})
                }
                ContentBlock::Image { url } => {
                    serde_json::json!({"type": "image_url", "image_url": {"url": url}})
                }
                ContentBlock::ToolResult { content, .. } => {
                    serde_json::json!({"type": "text", "text": content})
                }
            })
            .collect(),
    )
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    usage: Option<UsagePayload>,
}

#[derive(Deserialize, Default)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatCompletionMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallPayload>>,
}

#[derive(Deserialize)]
struct ToolCallPayload {
    id: String,
    function: FunctionPayload,
}

#[derive(Deserialize)]
struct FunctionPayload {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct UsagePayload {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    usage: EmbeddingUsage,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingUsage {
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelsResponseEntry>,
}

#[derive(Deserialize)]
struct ModelsResponseEntry {
    id: String,
}
