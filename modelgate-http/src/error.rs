//! Translates a [`GatewayError`] into the `{error:{message,type,code}}`
//! envelope (§6 "Error envelope", §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use modelgate_core::GatewayError;

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    code: &'static str,
}

/// Newtype so `GatewayError` (defined in `modelgate-core`, which knows
/// nothing about HTTP) can implement axum's `IntoResponse` here instead.
pub struct HttpError(pub GatewayError);

impl From<GatewayError> for HttpError {
    fn from(err: GatewayError) -> Self {
        HttpError(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorEnvelope {
            error: ErrorBody {
                message: self.0.to_string(),
                kind: self.0.code(),
                code: self.0.code(),
            },
        };
        (status, Json(body)).into_response()
    }
}
