//! The internal event vocabulary every provider adapter normalises into.
//!
//! A turn's response — buffered or streamed — is a finite sequence of
//! [`InternalEvent`] values produced by exactly one adapter and consumed by
//! exactly one caller (the core dispatcher, or the HTTP layer translating to
//! OpenAI-style SSE frames). The order contract lives on the type: chunk
//! events arrive in emission order, [`InternalEvent::Usage`] precedes
//! [`InternalEvent::Finish`], and `Finish` is always the last event.

use serde::{Deserialize, Serialize};

/// Why a turn stopped producing output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model produced a natural stop (OpenAI `stop`, Anthropic `end_turn`,
    /// Gemini `STOP`).
    Stop,
    /// The model hit its output token limit.
    Length,
    /// The model emitted one or more tool calls instead of (or alongside) text.
    ToolCalls,
    /// The turn failed; see the preceding `PolicyViolation`/error event for detail.
    Error,
}

/// Token usage for one turn, as reported by the vendor (or estimated).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// USD cost for this turn, when the adapter can price it from the model catalog.
    pub cost_usd: Option<f64>,
}

/// Severity of a [`InternalEvent::PolicyViolation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// One event in a normalised provider response stream.
///
/// # Order contract
///
/// For any single turn: `TextChunk`/`ThinkingChunk`/`ToolCallDelta` events
/// arrive in logical emission order; if a `Usage` event is present it precedes
/// `Finish`; `Finish` is the last event emitted, after which the producer
/// closes the channel. Exactly one `Finish` per stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InternalEvent {
    /// A fragment of visible assistant text.
    TextChunk { text: String },
    /// A fragment of model "thinking"/reasoning text (when the vendor exposes it).
    ThinkingChunk { text: String },
    /// An incremental fragment of a tool call's JSON arguments, keyed by the
    /// tool-call id so fragments from interleaved calls can be demultiplexed.
    ToolCallDelta { id: String, arguments_fragment: String },
    /// A fully-formed tool call (id, name, parsed arguments).
    ToolCallEvent {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// Token accounting for the turn. Precedes `Finish` when present.
    Usage { usage: Usage },
    /// Terminal event for the stream. Always last; exactly one per stream.
    Finish { reason: FinishReason },
    /// A policy enforcement failure surfaced mid-stream (severity `critical`),
    /// immediately followed by `Finish { reason: Error }`.
    PolicyViolation { message: String, severity: Severity },
}

impl InternalEvent {
    /// `true` for the handful of events that carry no further payload after
    /// them in the order contract (only `Finish` itself).
    pub fn is_terminal(&self) -> bool {
        matches!(self, InternalEvent::Finish { .. })
    }
}
