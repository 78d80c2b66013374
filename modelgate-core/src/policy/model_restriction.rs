//! Stage 1: model restriction (§4.1).
//!
//! Resolves the request's model string to exactly one provider and checks it
//! against the role's whitelist/blacklist. Provider-level restrictions apply
//! before per-model rules.

use gateway_config::{ModelRestriction, RestrictionMode};
use model_catalog::ModelCache;

use crate::error::GatewayError;
use crate::message::ChatRequest;

/// What a `ChatRequest`'s model string resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedModel {
    pub provider: String,
    /// `vendor/name` when the request named a vendor, else the bare name.
    pub user_id: String,
    /// What the provider wire protocol accepts.
    pub native_id: String,
}

/// Resolves `request.model` to a single provider (§3 invariant: ambiguous
/// inputs are a caller error) then applies the whitelist/blacklist.
pub fn resolve_and_check(
    request: &ChatRequest,
    policy: &ModelRestriction,
    cache: &ModelCache,
) -> Result<ResolvedModel, GatewayError> {
    let (explicit_vendor, name) = request.split_model();

    let provider = match explicit_vendor {
        Some(vendor) => vendor.to_string(),
        None => {
            let mut candidates = cache.providers_containing(name);
            match candidates.len() {
                1 => candidates.pop().unwrap().to_string(),
                _ => return Err(GatewayError::AmbiguousModel(request.model.clone())),
            }
        }
    };

    let native_id = cache.resolve(&provider, name).to_string();
    let user_id = match explicit_vendor {
        Some(vendor) => format!("{vendor}/{name}"),
        None => name.to_string(),
    };

    if policy.enabled {
        check_restriction(policy, &provider, &user_id, name, &request.model)?;
    }

    Ok(ResolvedModel {
        provider,
        user_id,
        native_id,
    })
}

fn check_restriction(
    policy: &ModelRestriction,
    provider: &str,
    user_id: &str,
    bare_name: &str,
    original: &str,
) -> Result<(), GatewayError> {
    let model_matches = |m: &str| m == user_id || m == bare_name;
    match policy.mode {
        Some(RestrictionMode::Whitelist) => {
            if !policy.providers.is_empty() && !policy.providers.iter().any(|p| p == provider) {
                return Err(GatewayError::ModelNotAllowed(original.to_string()));
            }
            if !policy.models.is_empty() && !policy.models.iter().any(|m| model_matches(m)) {
                return Err(GatewayError::ModelNotAllowed(original.to_string()));
            }
        }
        Some(RestrictionMode::Blacklist) => {
            if policy.providers.iter().any(|p| p == provider) {
                return Err(GatewayError::ModelBlocked(original.to_string()));
            }
            if policy.models.iter().any(|m| model_matches(m)) {
                return Err(GatewayError::ModelBlocked(original.to_string()));
            }
        }
        None => {}
    }
    Ok(())
}
