//! The Bedrock Converse adapter (§4.2.1): AWS Bedrock's unified Converse
//! API, reached over the access/secret credential family with SigV4 request
//! signing (§4.3 bedrock tiebreak). Bedrock's real streaming transport is a
//! binary `application/vnd.amazon.eventstream` framing this crate does not
//! parse; credentials that only carry a bearer key use the buffered
//! Converse endpoint and the adapter simulates streaming by slicing the
//! finished text into fixed-size chunks (§4.2 "simulated-streaming path").

use async_trait::async_trait;
use gateway_config::{ProviderConfig, ProviderFamily};
use model_catalog::{ModelCache, ModelCatalogEntry};
use serde::Deserialize;
use serde_json::Value;

use super::sigv4;
use super::sse::error_body;
use super::{fold_tool_results_into_user_turns, EventStream, ModelCacheCell, ProviderAdapter, STREAM_CHANNEL_CAPACITY};
use crate::credential::PlaintextCredential;
use crate::error::GatewayError;
use crate::message::{ChatRequest, ChatResponse, ContentBlock, Message, Role, ToolCall, ToolSpec};
use gateway_protocol::{FinishReason, InternalEvent, Usage};

/// Simulated-streaming chunk size, in characters (§4.2).
const SIMULATED_CHUNK_CHARS: usize = 20;

pub struct BedrockAdapter {
    config: ProviderConfig,
    client: reqwest::Client,
    cache: ModelCacheCell,
}

impl BedrockAdapter {
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

    /// `base_url` is `https://bedrock-runtime.{region}.amazonaws.com`; the
    /// region is parsed out of the host for SigV4's credential scope.
    fn region(&self) -> String {
        self.config
            .base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('.')
            .nth(1)
            .unwrap_or("us-east-1")
            .to_string()
    }

    fn host(&self) -> String {
        self.config
            .base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    }

    async fn call_converse(
        &self,
        credential: &PlaintextCredential,
        model: &str,
        body: &Value,
    ) -> Result<ConverseResponse, GatewayError> {
        let path = format!("/model/{model}/converse");
        let payload = serde_json::to_vec(body).map_err(|e| GatewayError::ProviderError(e.to_string()))?;

        let mut req = self
            .client
            .post(format!("{}{path}", self.config.base_url.trim_end_matches('/')))
            .header("content-type", "application/json");

        if let (Some(access_key), Some(secret_key)) = (&credential.access_key, &credential.secret_key) {
            let signed = sigv4::sign(
                access_key,
                secret_key,
                &self.region(),
                "bedrock",
                &self.host(),
                &path,
                &payload,
                chrono::Utc::now(),
            );
            for (name, value) in signed.headers {
                req = req.header(name, value);
            }
        } else if let Some(bearer) = &credential.bearer_key {
            req = req.bearer_auth(bearer);
        } else {
            return Err(GatewayError::CredentialDecryptFailed);
        }

        let resp = req
            .body(payload)
            .send()
            .await
            .map_err(|e| GatewayError::ProviderError(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(GatewayError::ProviderError(error_body(resp).await));
        }
        resp.json().await.map_err(|e| GatewayError::ProviderError(e.to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::Bedrock
    }

    async fn chat_complete(
        &self,
        credential: &PlaintextCredential,
        request: &ChatRequest,
    ) -> Result<ChatResponse, GatewayError> {
        let (_, native_id) = request.split_model();
        let body = build_request(request);
        let raw = self.call_converse(credential, native_id, &body).await?;
        Ok(to_chat_response(native_id, raw))
    }

    /// Bedrock Converse's real streaming variant speaks a binary event
    /// framing this adapter does not implement (see module docs); every
    /// call goes through the buffered endpoint and chunks the result.
    async fn chat_stream(
        &self,
        credential: &PlaintextCredential,
        request: &ChatRequest,
    ) -> Result<EventStream, GatewayError> {
        let response = self.chat_complete(credential, request).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let text = response.content;
            let mut rest = text.as_str();
            while !rest.is_empty() {
                let split_at = rest
                    .char_indices()
                    .nth(SIMULATED_CHUNK_CHARS)
                    .map(|(idx, _)| idx)
                    .unwrap_or(rest.len());
                let (chunk, remainder) = rest.split_at(split_at);
                rest = remainder;
                if tx
                    .send(InternalEvent::TextChunk {
                        text: chunk.to_string(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            for tc in response.tool_calls {
                if tx
                    .send(InternalEvent::ToolCallEvent {
                        id: tc.id,
                        name: tc.name,
                        arguments: tc.arguments,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            if let Some(usage) = response.usage {
                let _ = tx.send(InternalEvent::Usage { usage }).await;
            }
            let _ = tx
                .send(InternalEvent::Finish {
                    reason: response.finish_reason,
                })
                .await;
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
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
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Error,
    }
}

pub(crate) fn build_request(request: &ChatRequest) -> Value {
    let normalised = fold_tool_results_into_user_turns(&request.messages);
    let messages: Vec<Value> = normalised.iter().map(message_to_json).collect();

    let mut inference_config = serde_json::Map::new();
    if let Some(t) = request.temperature {
        inference_config.insert("temperature".into(), serde_json::json!(t));
    }
    if let Some(max_tokens) = request.max_tokens {
        inference_config.insert("maxTokens".into(), serde_json::json!(max_tokens));
    }

    let mut body = serde_json::json!({ "messages": messages });
    let obj = body.as_object_mut().unwrap();
    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        obj.insert(
            "system".into(),
            serde_json::json!([{"text": system}]),
        );
    }
    if !inference_config.is_empty() {
        obj.insert("inferenceConfig".into(), Value::Object(inference_config));
    }
    if !request.tools.is_empty() {
        obj.insert(
            "toolConfig".into(),
            serde_json::json!({
                "tools": request.tools.iter().map(tool_to_json).collect::<Vec<_>>()
            }),
        );
    }
    body
}

fn tool_to_json(tool: &ToolSpec) -> Value {
    serde_json::json!({
        "toolSpec": {
            "name": tool.name,
            "description": tool.description,
            "inputSchema": {"json": tool.parameters},
        }
    })
}

fn message_to_json(m: &Message) -> Value {
    let role = match m.role {
        Role::Assistant => "assistant",
        _ => "user",
    };
    let mut content: Vec<Value> = m
        .content
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => serde_json::json!({"text": text}),
            ContentBlock::Image { url } => serde_json::json!({
                "image": {"source": {"url": url}}
            }),
            ContentBlock::ToolResult { tool_call_id, content } => serde_json::json!({
                "toolResult": {
                    "toolUseId": tool_call_id,
                    "content": [{"text": content}],
                }
            }),
        })
        .collect();
    for tc in &m.tool_calls {
        content.push(serde_json::json!({
            "toolUse": {
                "toolUseId": tc.id,
                "name": tc.name,
                "input": if tc.arguments.is_null() { Value::Object(Default::default()) } else { tc.arguments.clone() },
            }
        }));
    }
    serde_json::json!({"role": role, "content": content})
}

fn to_chat_response(native_id: &str, raw: ConverseResponse) -> ChatResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in raw.output.message.content {
        match block {
            ConverseContentBlock::Text(text) => content.push_str(&text),
            ConverseContentBlock::ToolUse(tool_use) => tool_calls.push(ToolCall {
                id: tool_use.tool_use_id,
                name: tool_use.name,
                arguments: tool_use.input,
            }),
        }
    }
    ChatResponse {
        model: native_id.to_string(),
        content,
        tool_calls,
        finish_reason: map_finish_reason(&raw.stop_reason),
        usage: Some(Usage {
            prompt_tokens: raw.usage.input_tokens,
            completion_tokens: raw.usage.output_tokens,
            total_tokens: raw.usage.total_tokens,
            cost_usd: None,
        }),
    }
}

#[derive(Deserialize)]
struct ConverseResponse {
    output: ConverseOutput,
    #[serde(rename = "stopReason")]
    stop_reason: String,
    usage: ConverseUsage,
}

#[derive(Deserialize)]
struct ConverseOutput {
    message: ConverseOutputMessage,
}

#[derive(Deserialize)]
struct ConverseOutputMessage {
    content: Vec<ConverseContentBlock>,
}

/// Externally tagged with one key per block (`{"text": "..."}` or
/// `{"toolUse": {...}}`); newtype variants so the tag's value is the raw
/// string/object, not a further-nested single-field struct.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
enum ConverseContentBlock {
    Text(String),
    ToolUse(ConverseToolUse),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseToolUse {
    tool_use_id: String,
    name: String,
    input: Value,
}

#[derive(Deserialize)]
struct ConverseUsage {
    #[serde(rename = "inputTokens")]
    input_tokens: u32,
    #[serde(rename = "outputTokens")]
    output_tokens: u32,
    #[serde(rename = "totalTokens")]
    total_tokens: u32,
}
