//! `GET /health` (§6): liveness probe, no auth.

use axum::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
