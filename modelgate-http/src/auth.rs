//! Bearer API-key authentication (§6 "Authentication").
//!
//! Anonymous access is refused with 401 and no retry — there is no retry
//! seam here at all, this runs once per request before anything else.

use axum::http::HeaderMap;

use modelgate_core::{GatewayError, TenantScope};

use crate::AppState;

/// Extracts `Authorization: Bearer <key>` and resolves it to a
/// [`TenantScope`] through the configured [`ApiKeyDirectory`].
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<TenantScope, GatewayError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(GatewayError::AuthenticationRequired)?;

    let api_key = header
        .strip_prefix("Bearer ")
        .ok_or(GatewayError::AuthenticationRequired)?
        .trim();
    if api_key.is_empty() {
        return Err(GatewayError::ApiKeyRequired);
    }

    state.api_keys.resolve(api_key).await
}
