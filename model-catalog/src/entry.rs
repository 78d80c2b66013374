//! A single row of a provider's model catalog.

use serde::{Deserialize, Serialize};

/// Capability flags a model may advertise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub supports_tools: bool,
    pub supports_reasoning: bool,
    pub supports_embeddings: bool,
}

/// Per-million-token pricing, when the catalog knows it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: Option<f64>,
    pub output_per_million: Option<f64>,
}

/// One entry in a provider's model catalog: the user-visible id, the native
/// id the vendor wire protocol accepts, and everything the core needs to
/// route to and price a model without calling the vendor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalogEntry {
    /// User-visible id, e.g. `openai/gpt-4o`.
    pub user_id: String,
    /// What the vendor wire protocol accepts, e.g. `gpt-4o-2024-08-06`.
    pub native_id: String,
    pub display_name: String,
    pub provider: String,
    pub capabilities: ModelCapabilities,
    pub context_limit: Option<u32>,
    pub output_limit: Option<u32>,
    pub pricing: ModelPricing,
}

impl ModelCatalogEntry {
    /// The bare name with any `vendor/` prefix stripped, if present.
    pub fn short_user_id(&self) -> Option<&str> {
        self.user_id.split_once('/').map(|(_, short)| short)
    }
}
