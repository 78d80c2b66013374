//! Translation from [`InternalEvent`] to the OpenAI streaming wire shape.
//!
//! The HTTP layer owns the actual `text/event-stream` framing (`data: ...\n\n`,
//! terminal `data: [DONE]`); this module only builds the JSON payload of
//! each frame, keeping event construction separate from envelope/wire
//! injection.

use serde::Serialize;
use serde_json::Value;

use crate::event::{FinishReason, InternalEvent};

/// One `choices[0].delta` fragment of an OpenAI chat-completion-chunk frame.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolCallChunk {
    pub index: usize,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub function: ToolCallFunctionChunk,
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolCallFunctionChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub arguments: String,
}

/// One `data: {...}` frame body of an OpenAI `/v1/chat/completions` stream.
#[derive(Clone, Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<&'static str>,
}

fn finish_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::Error => "stop",
    }
}

/// Converts one [`InternalEvent`] into zero or one OpenAI chunk frames.
///
/// Returns `None` for events that carry no independent OpenAI-wire
/// representation (`ThinkingChunk`, `PolicyViolation` — the HTTP layer turns
/// the latter into a terminal error frame out of band).
pub fn to_chat_completion_chunk(
    event: &InternalEvent,
    id: &str,
    created: i64,
    model: &str,
) -> Option<ChatCompletionChunk> {
    let choice = match event {
        InternalEvent::TextChunk { text } => ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                content: Some(text.clone()),
                ..Default::default()
            },
            finish_reason: None,
        },
        InternalEvent::ToolCallDelta { id: call_id, arguments_fragment } => ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                tool_calls: Some(vec![ToolCallChunk {
                    index: 0,
                    id: Some(call_id.clone()),
                    kind: Some("function".to_string()),
                    function: ToolCallFunctionChunk {
                        name: None,
                        arguments: arguments_fragment.clone(),
                    },
                }]),
                ..Default::default()
            },
            finish_reason: None,
        },
        InternalEvent::ToolCallEvent { id: call_id, name, arguments } => ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                tool_calls: Some(vec![ToolCallChunk {
                    index: 0,
                    id: Some(call_id.clone()),
                    kind: Some("function".to_string()),
                    function: ToolCallFunctionChunk {
                        name: Some(name.clone()),
                        arguments: arguments.to_string(),
                    },
                }]),
                ..Default::default()
            },
            finish_reason: None,
        },
        InternalEvent::Finish { reason } => ChunkChoice {
            index: 0,
            delta: ChunkDelta::default(),
            finish_reason: Some(finish_reason_str(*reason)),
        },
        InternalEvent::Usage { .. } | InternalEvent::ThinkingChunk { .. } | InternalEvent::PolicyViolation { .. } => {
            return None;
        }
    };

    let usage = match event {
        InternalEvent::Usage { usage } => Some(serde_json::json!({
            "prompt_tokens": usage.prompt_tokens,
            "completion_tokens": usage.completion_tokens,
            "total_tokens": usage.total_tokens,
        })),
        _ => None,
    };

    Some(ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk",
        created,
        model: model.to_string(),
        choices: if usage.is_some() { vec![] } else { vec![choice] },
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Usage;

    #[test]
    fn text_chunk_becomes_content_delta() {
        let ev = InternalEvent::TextChunk { text: "hi".into() };
        let chunk = to_chat_completion_chunk(&ev, "id", 0, "gpt-4o").unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hi"));
    }

    #[test]
    fn finish_sets_finish_reason_and_empty_delta() {
        let ev = InternalEvent::Finish { reason: FinishReason::ToolCalls };
        let chunk = to_chat_completion_chunk(&ev, "id", 0, "gpt-4o").unwrap();
        assert_eq!(chunk.choices[0].finish_reason, Some("tool_calls"));
        assert!(chunk.choices[0].delta.content.is_none());
    }

    #[test]
    fn usage_event_carries_no_choices() {
        let ev = InternalEvent::Usage {
            usage: Usage { prompt_tokens: 1, completion_tokens: 2, total_tokens: 3, cost_usd: None },
        };
        let chunk = to_chat_completion_chunk(&ev, "id", 0, "gpt-4o").unwrap();
        assert!(chunk.choices.is_empty());
        assert!(chunk.usage.is_some());
    }

    #[test]
    fn thinking_chunk_has_no_wire_representation() {
        let ev = InternalEvent::ThinkingChunk { text: "pondering".into() };
        assert!(to_chat_completion_chunk(&ev, "id", 0, "gpt-4o").is_none());
    }
}
