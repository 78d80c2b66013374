//! The Gemini adapter (§4.2.1): `generateContent` / `streamGenerateContent`.
//! Gemini has no system role, so the system prompt is injected as a leading
//! user turn followed by a scripted acknowledgement (§4.2 "Gemini pattern");
//! tool calls are `functionCall`/`functionResponse` parts, not a dedicated
//! message role.

use async_trait::async_trait;
use gateway_config::{ProviderConfig, ProviderFamily};
use model_catalog::{ModelCache, ModelCatalogEntry};
use serde::Deserialize;
use serde_json::Value;

use super::sse::{data_lines, error_body, http_error};
use super::{inject_system_as_leading_turn, EventStream, ModelCacheCell, ProviderAdapter, STREAM_CHANNEL_CAPACITY};
use crate::credential::PlaintextCredential;
use crate::error::GatewayError;
use crate::message::{ChatRequest, ChatResponse, ContentBlock, Message, Role, ToolCall, ToolSpec};
use gateway_protocol::{FinishReason, InternalEvent, Usage};

pub struct GeminiAdapter {
    config: ProviderConfig,
    client: reqwest::Client,
    cache: ModelCacheCell,
}

impl GeminiAdapter {
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

    fn url(&self, model: &str, method: &str, key: &str, stream: bool) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let alt = if stream { "&alt=sse" } else { "" };
        format!("{base}/models/{model}:{method}?key={key}{alt}")
    }

    fn key(&self, credential: &PlaintextCredential) -> Result<String, GatewayError> {
        credential
            .bearer_key
            .clone()
            .ok_or(GatewayError::CredentialDecryptFailed)
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::Gemini
    }

    async fn chat_complete(
        &self,
        credential: &PlaintextCredential,
        request: &ChatRequest,
    ) -> Result<ChatResponse, GatewayError> {
        let (_, native_id) = request.split_model();
        let key = self.key(credential)?;
        let body = build_request(request);
        let resp = self
            .client
            .post(self.url(native_id, "generateContent", &key, false))
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        if !resp.status().is_success() {
            return Err(GatewayError::ProviderError(error_body(resp).await));
        }
        let raw: GenerateContentResponse = resp.json().await.map_err(http_error)?;
        Ok(to_chat_response(native_id, raw))
    }

    async fn chat_stream(
        &self,
        credential: &PlaintextCredential,
        request: &ChatRequest,
    ) -> Result<EventStream, GatewayError> {
        let (_, native_id) = request.split_model();
        let key = self.key(credential)?;
        let body = build_request(request);
        let resp = self
            .client
            .post(self.url(native_id, "streamGenerateContent", &key, true))
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        if !resp.status().is_success() {
            return Err(GatewayError::ProviderError(error_body(resp).await));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            use futures::StreamExt;
            let mut lines = Box::pin(data_lines(resp));
            let mut usage = Usage::default();
            let mut finish = FinishReason::Stop;
            let mut tool_seq = 0u32;
            while let Some(line) = lines.next().await {
                let Ok(chunk) = serde_json::from_str::<GenerateContentResponse>(&line) else {
                    continue;
                };
                if let Some(u) = chunk.usage_metadata {
                    usage.prompt_tokens = u.prompt_token_count;
                    usage.completion_tokens = u.candidates_token_count;
                    usage.total_tokens = u.total_token_count;
                }
                let Some(candidate) = chunk.candidates.into_iter().next() else {
                    continue;
                };
                if let Some(reason) = candidate.finish_reason.as_deref() {
                    finish = map_finish_reason(reason);
                }
                for part in candidate.content.parts {
                    if let Some(text) = part.text {
                        if tx.send(InternalEvent::TextChunk { text }).await.is_err() {
                            return;
                        }
                    } else if let Some(function_call) = part.function_call {
                        tool_seq += 1;
                        let id = format!("call-{tool_seq}");
                        if tx
                            .send(InternalEvent::ToolCallEvent {
                                id,
                                name: function_call.name,
                                arguments: function_call.args,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            let _ = tx.send(InternalEvent::Usage { usage }).await;
            let _ = tx.send(InternalEvent::Finish { reason: finish }).await;
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
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "OTHER" => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

pub(crate) fn build_request(request: &ChatRequest) -> Value {
    let normalised = inject_system_as_leading_turn(request.system_prompt.as_deref(), &request.messages);
    let contents: Vec<Value> = normalised.iter().map(message_to_json).collect();

    let mut generation_config = serde_json::Map::new();
    if let Some(t) = request.temperature {
        generation_config.insert("temperature".into(), serde_json::json!(t));
    }
    if let Some(max_tokens) = request.max_tokens {
        generation_config.insert("maxOutputTokens".into(), serde_json::json!(max_tokens));
    }

    let mut body = serde_json::json!({ "contents": contents });
    let obj = body.as_object_mut().unwrap();
    if !generation_config.is_empty() {
        obj.insert("generationConfig".into(), Value::Object(generation_config));
    }
    if !request.tools.is_empty() {
        obj.insert(
            "tools".into(),
            serde_json::json!([{
                "functionDeclarations": request.tools.iter().map(tool_to_json).collect::<Vec<_>>()
            }]),
        );
    }
    body
}

fn tool_to_json(tool: &ToolSpec) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.parameters,
    })
}

fn message_to_json(m: &Message) -> Value {
    let role = match m.role {
        Role::Assistant => "model",
        _ => "user",
    };
    let mut parts: Vec<Value> = m
        .content
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => serde_json::json!({"text": text}),
            ContentBlock::Image { url } => serde_json::json!({
                "fileData": {"fileUri": url}
            }),
            ContentBlock::ToolResult { tool_call_id, content } => serde_json::json!({
                "functionResponse": {
                    "name": tool_call_id,
                    "response": {"content": content},
                }
            }),
        })
        .collect();
    for tc in &m.tool_calls {
        parts.push(serde_json::json!({
            "functionCall": {"name": tc.name, "args": tc.arguments}
        }));
    }
    serde_json::json!({"role": role, "parts": parts})
}

fn to_chat_response(native_id: &str, raw: GenerateContentResponse) -> ChatResponse {
    let candidate = raw.candidates.into_iter().next();
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut tool_seq = 0u32;
    if let Some(candidate) = &candidate {
        for part in &candidate.content.parts {
            if let Some(text) = &part.text {
                content.push_str(text);
            } else if let Some(function_call) = &part.function_call {
                tool_seq += 1;
                tool_calls.push(ToolCall {
                    id: format!("call-{tool_seq}"),
                    name: function_call.name.clone(),
                    arguments: function_call.args.clone(),
                });
            }
        }
    }
    ChatResponse {
        model: native_id.to_string(),
        content,
        tool_calls,
        finish_reason: candidate
            .as_ref()
            .and_then(|c| c.finish_reason.as_deref())
            .map(map_finish_reason)
            .unwrap_or(FinishReason::Stop),
        usage: raw.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
            cost_usd: None,
        }),
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

/// Gemini represents a part as a flat object with exactly one of these
/// fields set (`{"text": "..."}` or `{"functionCall": {...}}`), not as an
/// internally- or externally-tagged enum, so this has to be deserialized as
/// a struct of options rather than a tagged enum.
#[derive(Deserialize, Default)]
struct Part {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<FunctionCall>,
    #[serde(rename = "functionResponse")]
    function_response: Option<Value>,
}

#[derive(Deserialize, Clone)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}
