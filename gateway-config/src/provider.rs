//! Static per-provider configuration (base URL, vendor family, default timeout).
//!
//! Distinct from the runtime `ProviderCredential` rows kept in the tenant
//! database: this is process-wide, read once at startup, and handed to the
//! core's adapter registry factories.

use serde::{Deserialize, Serialize};

/// The wire-protocol family an adapter speaks; distinct from `provider` tag
/// since several providers (any OpenAI-compatible third party) share a family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    Openai,
    Anthropic,
    Gemini,
    Bedrock,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider tag used throughout the system, e.g. `"openai"`, `"my-groq"`.
    pub provider: String,
    pub family: ProviderFamily,
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}
