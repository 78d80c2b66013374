//! The internal chat-message vocabulary every adapter normalises to and from
//! (§3 `ChatRequest`, §4.2 normalisation rules).

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { url: String },
    ToolResult { tool_call_id: String, content: String },
}

impl ContentBlock {
    pub fn text(s: impl Into<String>) -> Self {
        ContentBlock::Text { text: s.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// An outgoing or incoming tool call. `arguments` is always valid JSON, an
/// empty object `{}` when the call takes no parameters (§4.2: "always-present
/// `input` field even when empty").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Role::Tool` messages: which call this result answers.
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::text(text)],
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Concatenation of every text block, in order. Used for prompt-length
    /// and pattern checks, and for the `chars/4` token estimate fallback.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ReasoningConfig {
    pub enabled: bool,
    pub effort: Option<ReasoningEffort>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

/// A request to the gateway's `/v1/chat/completions` surface, already parsed
/// out of the OpenAI-shaped wire body into the internal vocabulary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    /// `vendor/name` or a bare name; resolved to exactly one provider by the
    /// dispatcher before any adapter sees it (§3 invariant).
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    /// Splits `model` into `(vendor, name)` when it has the `vendor/name`
    /// shape; otherwise `(None, model)`.
    pub fn split_model(&self) -> (Option<&str>, &str) {
        match self.model.split_once('/') {
            Some((vendor, name)) => (Some(vendor), name),
            None => (None, self.model.as_str()),
        }
    }

    /// Total character length across every message's text content (§4.1
    /// prompt-length check).
    pub fn total_chars(&self) -> usize {
        self.system_prompt.as_deref().map(str::len).unwrap_or(0)
            + self.messages.iter().map(|m| m.text().len()).sum::<usize>()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: gateway_protocol::FinishReason,
    pub usage: Option<gateway_protocol::Usage>,
}
