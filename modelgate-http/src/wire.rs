//! OpenAI wire shapes (§6 "HTTP API (OpenAI-compatible subset)") and their
//! conversion to/from the internal vocabulary (§3 `ChatRequest`,
//! `InternalEvent`). This is the one place in the workspace that knows what
//! an OpenAI JSON body looks like; everything past this module speaks the
//! internal types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gateway_protocol::{FinishReason, Usage};
use modelgate_core::{ChatRequest, ChatResponse, ContentBlock, Message, ReasoningConfig, Role, ToolCall, ToolSpec};

#[derive(Clone, Debug, Deserialize)]
pub struct WireChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Vec<WireTool>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<WireContent>,
    #[serde(default)]
    pub tool_calls: Vec<WireToolCall>,
    pub tool_call_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WireContentPart>),
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: Option<String>,
    pub image_url: Option<WireImageUrl>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireImageUrl {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(default = "default_function_type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireToolCallFunction,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireToolCallFunction {
    pub name: String,
    /// OpenAI encodes tool-call arguments as a JSON string, not a nested object.
    pub arguments: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireTool {
    #[serde(default = "default_function_type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireToolFunction,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireToolFunction {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
}

fn default_function_type() -> String {
    "function".to_string()
}

fn default_parameters() -> Value {
    serde_json::json!({})
}

fn wire_content_to_text(content: &WireContent) -> String {
    match content {
        WireContent::Text(s) => s.clone(),
        WireContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| p.text.clone())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn wire_content_to_blocks(content: &WireContent) -> Vec<ContentBlock> {
    match content {
        WireContent::Text(s) => vec![ContentBlock::text(s.clone())],
        WireContent::Parts(parts) => parts
            .iter()
            .map(|p| match p.kind.as_str() {
                "image_url" => ContentBlock::Image {
                    url: p.image_url.as_ref().map(|i| i.url.clone()).unwrap_or_default(),
                },
                _ => ContentBlock::text(p.text.clone().unwrap_or_default()),
            })
            .collect(),
    }
}

/// Converts a parsed OpenAI-shaped request body into the internal
/// [`ChatRequest`] (§4.2 "Roles", §3 `ChatRequest`).
///
/// System-role wire messages are folded into `system_prompt` (concatenated,
/// in order, when more than one is present) rather than kept as ordinary
/// messages; everything else keeps its position.
pub fn wire_request_to_chat_request(wire: WireChatRequest) -> ChatRequest {
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for m in wire.messages {
        let role = match m.role.as_str() {
            "system" => {
                if let Some(content) = &m.content {
                    system_parts.push(wire_content_to_text(content));
                }
                continue;
            }
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            other => {
                tracing::warn!(role = other, "unrecognised message role, treating as user");
                Role::User
            }
        };

        let content = m
            .content
            .as_ref()
            .map(wire_content_to_blocks)
            .unwrap_or_default();
        let tool_calls = m
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::Object(Default::default())),
            })
            .collect();

        messages.push(Message {
            role,
            content,
            tool_calls,
            tool_call_id: m.tool_call_id,
        });
    }

    let tools = wire
        .tools
        .into_iter()
        .map(|t| ToolSpec {
            name: t.function.name,
            description: t.function.description,
            parameters: t.function.parameters,
        })
        .collect();

    ChatRequest {
        model: wire.model,
        system_prompt: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        },
        messages,
        tools,
        temperature: wire.temperature,
        max_tokens: wire.max_tokens,
        reasoning: ReasoningConfig::default(),
        stream: wire.stream,
    }
}

#[derive(Serialize)]
pub struct WireChatResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<WireChoice>,
    pub usage: Option<WireUsage>,
}

#[derive(Serialize)]
pub struct WireChoice {
    pub index: u32,
    pub message: WireResponseMessage,
    pub finish_reason: &'static str,
}

#[derive(Serialize)]
pub struct WireResponseMessage {
    pub role: &'static str,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireResponseToolCall>,
}

#[derive(Serialize)]
pub struct WireResponseToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireResponseToolCallFunction,
}

#[derive(Serialize)]
pub struct WireResponseToolCallFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Serialize)]
pub struct WireUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

fn finish_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::Error => "stop",
    }
}

/// Converts a buffered [`ChatResponse`] into the non-streaming OpenAI
/// `/v1/chat/completions` response body (§6).
pub fn chat_response_to_wire(response: ChatResponse, id: String, created: i64) -> WireChatResponse {
    let tool_calls = response
        .tool_calls
        .into_iter()
        .map(|tc| WireResponseToolCall {
            id: tc.id,
            kind: "function",
            function: WireResponseToolCallFunction {
                name: tc.name,
                arguments: tc.arguments.to_string(),
            },
        })
        .collect::<Vec<_>>();

    WireChatResponse {
        id,
        object: "chat.completion",
        created,
        model: response.model,
        choices: vec![WireChoice {
            index: 0,
            message: WireResponseMessage {
                role: "assistant",
                content: if response.content.is_empty() {
                    None
                } else {
                    Some(response.content)
                },
                tool_calls,
            },
            finish_reason: finish_reason_str(response.finish_reason),
        }],
        usage: response.usage.map(|u: Usage| WireUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}
