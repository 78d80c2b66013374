//! A small, vendor-agnostic `text/event-stream` reader.
//!
//! Every streaming HTTP vendor (OpenAI and OpenAI-compatible third parties,
//! Anthropic, Gemini) sends newline-delimited `data: {json}` frames
//! terminated by a blank line; only the sentinel differs (OpenAI's literal
//! `[DONE]`, Anthropic's typed `message_stop` event, Gemini's end of
//! stream). This module owns the framing; each adapter owns the JSON shape.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Response;

use crate::error::GatewayError;

/// Reads `resp`'s body as SSE frames, yielding the payload of every
/// `data: ` line that isn't the literal `[DONE]` sentinel. Lines that don't
/// parse as UTF-8 are dropped silently (a malformed frame boundary split
/// across a chunk is resynchronised on the next blank line).
pub(crate) fn data_lines(resp: Response) -> impl Stream<Item = String> {
    let byte_stream = resp.bytes_stream();
    async_stream::stream! {
        let mut buf = String::new();
        futures::pin_mut!(byte_stream);
        while let Some(chunk) = byte_stream.next().await {
            let chunk: Bytes = match chunk {
                Ok(c) => c,
                Err(_) => break,
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));
            loop {
                let Some(pos) = buf.find('\n') else { break };
                let line = buf[..pos].trim_end_matches('\r').to_string();
                buf.drain(..=pos);
                let Some(payload) = line.strip_prefix("data:") else { continue };
                let payload = payload.trim();
                if payload.is_empty() || payload == "[DONE]" {
                    continue;
                }
                yield payload.to_string();
            }
        }
    }
}

/// Reads the whole body and returns the parsed JSON error payload's message
/// field when present, else the raw body text, for a non-2xx response.
pub(crate) async fn error_body(resp: Response) -> String {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(str::to_string))
        })
        .unwrap_or(text);
    format!("http {status}: {message}")
}

pub(crate) fn http_error(err: reqwest::Error) -> GatewayError {
    GatewayError::ProviderError(err.to_string())
}
