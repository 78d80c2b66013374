//! `POST /v1/chat/completions` (§6): buffered JSON or `text/event-stream`
//! SSE, selected by the wire request's `stream` flag.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use uuid::Uuid;

use gateway_protocol::{to_chat_completion_chunk, InternalEvent};
use modelgate_core::DispatchOutcome;

use crate::auth::authenticate;
use crate::error::HttpError;
use crate::wire::{chat_response_to_wire, wire_request_to_chat_request, WireChatRequest};
use crate::AppState;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(wire): Json<WireChatRequest>,
) -> Result<Response, HttpError> {
    let scope = authenticate(&state, &headers).await?;
    let role = scope
        .role_ids
        .first()
        .ok_or(modelgate_core::GatewayError::NoRoleAssigned)?
        .clone();
    let request = wire_request_to_chat_request(wire);
    let streaming = request.stream;
    let model = request.model.clone();

    let outcome = state
        .dispatcher
        .dispatch(&scope, &role, request, &[])
        .await?;

    match outcome {
        DispatchOutcome::Buffered(response) => {
            let id = format!("chatcmpl-{}", Uuid::new_v4());
            let wire_response = chat_response_to_wire(response, id, now_unix());
            Ok(Json(wire_response).into_response())
        }
        DispatchOutcome::Stream(stream) => {
            debug_assert!(streaming, "adapter returned a stream for a non-streaming request");
            Ok(sse_response(stream, model))
        }
    }
}

/// Translates the internal event stream into OpenAI streaming-delta SSE
/// frames (§6, §7 "mid-stream errors"), terminated by `data: [DONE]`.
fn sse_response(
    events: std::pin::Pin<Box<dyn Stream<Item = InternalEvent> + Send>>,
    model: String,
) -> Response {
    let id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = now_unix();

    let frames = events.filter_map(move |event| {
        let id = id.clone();
        let model = model.clone();
        async move {
            let chunk = to_chat_completion_chunk(&event, &id, created, &model)?;
            let json = serde_json::to_string(&chunk).unwrap_or_default();
            Some(Ok::<Event, Infallible>(Event::default().data(json)))
        }
    });

    let done = futures::stream::once(async {
        Ok::<Event, Infallible>(Event::default().data("[DONE]"))
    });
    let full = frames.chain(done);

    Sse::new(full).keep_alive(KeepAlive::default()).into_response()
}
