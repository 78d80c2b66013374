//! The Anthropic adapter (§4.2.1): Messages API. System prompt is a
//! top-level field rather than a message; tool-result content blocks are
//! folded into user turns (§4.2 "Anthropic/Bedrock Converse pattern");
//! tool-use blocks always carry an `input` object, even when empty.

use async_trait::async_trait;
use gateway_config::{ProviderConfig, ProviderFamily};
use model_catalog::{ModelCache, ModelCatalogEntry};
use serde::Deserialize;
use serde_json::Value;

use super::sse::{data_lines, error_body, http_error};
use super::{fold_tool_results_into_user_turns, EventStream, ModelCacheCell, ProviderAdapter, STREAM_CHANNEL_CAPACITY};
use crate::credential::PlaintextCredential;
use crate::error::GatewayError;
use crate::message::{ChatRequest, ChatResponse, ContentBlock, Message, Role, ToolCall, ToolSpec};
use gateway_protocol::{FinishReason, InternalEvent, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    config: ProviderConfig,
    client: reqwest::Client,
    cache: ModelCacheCell,
}

impl AnthropicAdapter {
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

    fn request_builder(&self, credential: &PlaintextCredential) -> Result<reqwest::RequestBuilder, GatewayError> {
        let key = credential
            .bearer_key
            .clone()
            .ok_or(GatewayError::CredentialDecryptFailed)?;
        Ok(self
            .client
            .post(self.url("/messages"))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION))
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    async fn chat_complete(
        &self,
        credential: &PlaintextCredential,
        request: &ChatRequest,
    ) -> Result<ChatResponse, GatewayError> {
        let (_, native_id) = request.split_model();
        let body = build_request(native_id, request, false);
        let resp = self
            .request_builder(credential)?
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        if !resp.status().is_success() {
            return Err(GatewayError::ProviderError(error_body(resp).await));
        }
        let raw: MessagesResponse = resp.json().await.map_err(http_error)?;
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
            .request_builder(credential)?
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
            let mut current_tool: Option<(String, String)> = None;
            while let Some(line) = lines.next().await {
                let Ok(event) = serde_json::from_str::<StreamEvent>(&line) else {
                    continue;
                };
                match event {
                    StreamEvent::MessageStart { message } => {
                        usage.prompt_tokens = message.usage.input_tokens;
                    }
                    StreamEvent::ContentBlockStart { content_block, .. } => {
                        if content_block.block_type == "tool_use" {
                            let id = content_block.id.unwrap_or_default();
                            let name = content_block.name.unwrap_or_default();
                            current_tool = Some((id.clone(), name.clone()));
                            if tx
                                .send(InternalEvent::ToolCallEvent {
                                    id,
                                    name,
                                    arguments: Value::Null,
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                    StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                        ContentDelta::TextDelta { text } => {
                            if tx.send(InternalEvent::TextChunk { text }).await.is_err() {
                                return;
                            }
                        }
                        ContentDelta::ThinkingDelta { thinking } => {
                            if tx
                                .send(InternalEvent::ThinkingChunk { text: thinking })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        ContentDelta::InputJsonDelta { partial_json } => {
                            if let Some((id, _)) = &current_tool {
                                if tx
                                    .send(InternalEvent::ToolCallDelta {
                                        id: id.clone(),
                                        arguments_fragment: partial_json,
                                    })
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                        }
                    },
                    StreamEvent::ContentBlockStop { .. } => {
                        current_tool = None;
                    }
                    StreamEvent::MessageDelta { delta, usage: u } => {
                        if let Some(stop_reason) = delta.stop_reason {
                            finish = map_finish_reason(&stop_reason);
                        }
                        usage.completion_tokens = u.output_tokens;
                    }
                    StreamEvent::MessageStop => break,
                    StreamEvent::Other => {}
                }
            }
            usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
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
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Error,
    }
}

pub(crate) fn build_request(model: &str, request: &ChatRequest, stream: bool) -> Value {
    let normalised = fold_tool_results_into_user_turns(&request.messages);
    let messages: Vec<Value> = normalised.iter().map(message_to_json).collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": stream,
    });
    let obj = body.as_object_mut().unwrap();
    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        obj.insert("system".into(), Value::String(system.to_string()));
    }
    if let Some(t) = request.temperature {
        obj.insert("temperature".into(), serde_json::json!(t));
    }
    if !request.tools.is_empty() {
        obj.insert(
            "tools".into(),
            serde_json::json!(request.tools.iter().map(tool_to_json).collect::<Vec<_>>()),
        );
    }
    body
}

fn tool_to_json(tool: &ToolSpec) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

fn message_to_json(m: &Message) -> Value {
    let role = match m.role {
        Role::Assistant => "assistant",
        _ => "user",
    };
    let mut blocks: Vec<Value> = m
        .content
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => serde_json::json!({"type": "text", "text": text}),
            ContentBlock::Image { url } => serde_json::json!({
                "type": "image",
                "source": {"type": "url", "url": url},
            }),
            ContentBlock::ToolResult { tool_call_id, content } => serde_json::json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content,
            }),
        })
        .collect();
    for tc in &m.tool_calls {
        blocks.push(serde_json::json!({
            "type": "tool_use",
            "id": tc.id,
            "name": tc.name,
            "input": if tc.arguments.is_null() { Value::Object(Default::default()) } else { tc.arguments.clone() },
        }));
    }
    serde_json::json!({"role": role, "content": blocks})
}

fn to_chat_response(native_id: &str, raw: MessagesResponse) -> ChatResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in raw.content {
        match block {
            ResponseBlock::Text { text } => content.push_str(&text),
            ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
        }
    }
    ChatResponse {
        model: native_id.to_string(),
        content,
        tool_calls,
        finish_reason: raw
            .stop_reason
            .as_deref()
            .map(map_finish_reason)
            .unwrap_or(FinishReason::Stop),
        usage: Some(Usage {
            prompt_tokens: raw.usage.input_tokens,
            completion_tokens: raw.usage.output_tokens,
            total_tokens: raw.usage.input_tokens + raw.usage.output_tokens,
            cost_usd: None,
        }),
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: MessagesUsage,
}

#[derive(Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart { message: StreamMessageStart },
    ContentBlockStart { index: u32, content_block: StreamContentBlock },
    ContentBlockDelta { index: u32, delta: ContentDelta },
    ContentBlockStop { index: u32 },
    MessageDelta { delta: MessageDeltaBody, usage: MessagesUsagePartial },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StreamMessageStart {
    usage: MessagesUsagePartial,
}

#[derive(Deserialize, Default)]
struct MessagesUsagePartial {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct StreamContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ReasoningConfig;

    fn sample_request() -> ChatRequest {
        ChatRequest {
            model: "anthropic/claude-3-5-sonnet".into(),
            system_prompt: Some("be terse".into()),
            messages: vec![Message::user("hi")],
            tools: vec![],
            temperature: None,
            max_tokens: None,
            reasoning: ReasoningConfig::default(),
            stream: false,
        }
    }

    #[test]
    fn build_request_puts_system_as_top_level_field_not_a_message() {
        let body = build_request("claude-3-5-sonnet-20241022", &sample_request(), false);
        assert_eq!(body["system"], "be terse");
        let messages = body["messages"].as_array().unwrap();
        assert!(messages.iter().all(|m| m["role"] != "system"));
    }

    #[test]
    fn build_request_defaults_max_tokens_when_absent() {
        let body = build_request("claude-3-5-sonnet-20241022", &sample_request(), false);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tool_results_fold_into_a_user_turn_with_tool_result_blocks() {
        let mut req = sample_request();
        req.messages.push(Message {
            role: Role::Tool,
            content: vec![ContentBlock::text("42")],
            tool_calls: vec![],
            tool_call_id: Some("call-1".into()),
        });
        let body = build_request("claude-3-5-sonnet-20241022", &req, false);
        let messages = body["messages"].as_array().unwrap();
        let folded = &messages[1];
        assert_eq!(folded["role"], "user");
        assert_eq!(folded["content"][0]["type"], "tool_result");
        assert_eq!(folded["content"][0]["tool_use_id"], "call-1");
    }

    #[test]
    fn tool_use_input_defaults_to_empty_object_when_no_arguments() {
        let mut req = sample_request();
        req.messages.push(Message {
            role: Role::Assistant,
            content: vec![],
            tool_calls: vec![ToolCall {
                id: "call-1".into(),
                name: "ping".into(),
                arguments: Value::Null,
            }],
            tool_call_id: None,
        });
        let body = build_request("claude-3-5-sonnet-20241022", &req, false);
        let messages = body["messages"].as_array().unwrap();
        let assistant = &messages[1];
        assert_eq!(assistant["content"][0]["input"], serde_json::json!({}));
    }
}
