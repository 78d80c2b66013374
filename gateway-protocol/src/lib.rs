//! Internal event vocabulary shared between provider adapters, the
//! resilience executor, and the HTTP layer.
//!
//! This crate has no dependency on `modelgate-core`: the wire-shaped event
//! vocabulary is the one thing every layer of the gateway needs to agree
//! on, so it lives in its own leaf crate.

pub mod event;
pub mod sse;

pub use event::{FinishReason, InternalEvent, Severity, Usage};
pub use sse::{to_chat_completion_chunk, ChatCompletionChunk, ChunkChoice, ChunkDelta};
