//! `POST /v1/embeddings` (§6): OpenAI-compatible embedding request/response.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::authenticate;
use crate::error::HttpError;
use crate::AppState;

#[derive(Deserialize)]
pub struct WireEmbeddingsRequest {
    pub model: String,
    pub input: WireEmbeddingsInput,
    pub dimensions: Option<usize>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum WireEmbeddingsInput {
    One(String),
    Many(Vec<String>),
}

impl WireEmbeddingsInput {
    fn into_texts(self) -> Vec<String> {
        match self {
            WireEmbeddingsInput::One(s) => vec![s],
            WireEmbeddingsInput::Many(v) => v,
        }
    }
}

#[derive(Serialize)]
pub struct WireEmbeddingsResponse {
    pub object: &'static str,
    pub data: Vec<WireEmbeddingItem>,
    pub model: String,
    pub usage: WireEmbeddingsUsage,
}

#[derive(Serialize)]
pub struct WireEmbeddingItem {
    pub object: &'static str,
    pub embedding: Vec<f32>,
    pub index: usize,
}

#[derive(Serialize)]
pub struct WireEmbeddingsUsage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(wire): Json<WireEmbeddingsRequest>,
) -> Result<Json<WireEmbeddingsResponse>, HttpError> {
    let scope = authenticate(&state, &headers).await?;
    let role = scope
        .role_ids
        .first()
        .ok_or(modelgate_core::GatewayError::NoRoleAssigned)?
        .clone();

    let model = wire.model.clone();
    let texts = wire.input.into_texts();
    let (vectors, total_tokens) = state
        .dispatcher
        .embed(&scope, &role, &model, texts, wire.dimensions)
        .await?;

    let data = vectors
        .into_iter()
        .enumerate()
        .map(|(index, embedding)| WireEmbeddingItem {
            object: "embedding",
            embedding,
            index,
        })
        .collect();

    Ok(Json(WireEmbeddingsResponse {
        object: "list",
        data,
        model,
        usage: WireEmbeddingsUsage {
            prompt_tokens: total_tokens,
            total_tokens,
        },
    }))
}
