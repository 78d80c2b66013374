//! `RolePolicy` and its eight independently-enabled sub-policies (§3).
//!
//! Deserialized from the tenant database's `role_policies` table (JSON or
//! TOML encoded, depending on how the admin surface stores it); every field
//! has a sensible default so a role can enable only the sub-policies it
//! cares about.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Whitelist or blacklist mode for [`ModelRestriction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionMode {
    Whitelist,
    Blacklist,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelRestriction {
    #[serde(default)]
    pub enabled: bool,
    pub mode: Option<RestrictionMode>,
    /// User-visible model ids (`vendor/name`) the mode applies to.
    #[serde(default)]
    pub models: Vec<String>,
    /// Providers blocked (or allowed, depending on `mode`) outright, before
    /// any per-model check runs.
    #[serde(default)]
    pub providers: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PromptPolicy {
    #[serde(default)]
    pub enabled: bool,
    pub max_chars: Option<usize>,
    pub max_messages: Option<usize>,
    #[serde(default)]
    pub injection_detection: bool,
    #[serde(default)]
    pub pii_detection: bool,
    #[serde(default)]
    pub pii_action: PiiAction,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiAction {
    #[default]
    Block,
    Redact,
    Warn,
    Log,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Allowed,
    Denied,
    Removed,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub tools_allowed: bool,
    /// Per-tool status override by tool name; tools absent from this map are
    /// `Pending`, which the enforcer treats as denied-by-default (§4.1).
    #[serde(default)]
    pub statuses: std::collections::HashMap<String, ToolStatus>,
    pub max_tools_per_request: Option<usize>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    #[serde(default)]
    pub enabled: bool,
    pub requests_per_minute: Option<u32>,
    pub tokens_per_minute: Option<u32>,
    pub requests_per_hour: Option<u32>,
    pub requests_per_day: Option<u32>,
    #[serde(default)]
    pub burst: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAction {
    #[default]
    Block,
    Warn,
    Throttle,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BudgetPolicy {
    #[serde(default)]
    pub enabled: bool,
    pub daily_usd: Option<f64>,
    pub weekly_usd: Option<f64>,
    pub monthly_usd: Option<f64>,
    pub per_request_usd: Option<f64>,
    #[serde(default)]
    pub on_exceeded: BudgetAction,
    /// Percentage over the period cap still allowed before the on-exceeded
    /// action fires (open question §9 — implementation-defined, default 0).
    #[serde(default)]
    pub soft_limit_pct: f64,
    #[serde(default = "default_warning_pct")]
    pub warning_threshold_pct: f64,
    #[serde(default = "default_critical_pct")]
    pub critical_threshold_pct: f64,
}

fn default_warning_pct() -> f64 {
    80.0
}

fn default_critical_pct() -> f64 {
    95.0
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CachingPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_similarity")]
    pub similarity_threshold: f64,
}

fn default_similarity() -> f64 {
    0.95
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoutingPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub provider: String,
    pub model: String,
    pub priority: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResiliencePolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub retry_enabled: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,
    #[serde(default = "default_true")]
    pub retry_on_rate_limit: bool,
    #[serde(default = "default_true")]
    pub retry_on_server_error: bool,
    #[serde(default)]
    pub fallback_enabled: bool,
    #[serde(default)]
    pub fallback_chain: Vec<FallbackEntry>,
    #[serde(default = "default_cb_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_cb_cooldown")]
    pub circuit_breaker_cooldown_secs: u64,
}

fn default_base_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    10_000
}
fn default_cb_threshold() -> u32 {
    5
}
fn default_cb_cooldown() -> u64 {
    30
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_enabled: false,
            max_retries: 0,
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: true,
            retry_on_timeout: true,
            retry_on_rate_limit: true,
            retry_on_server_error: true,
            fallback_enabled: false,
            fallback_chain: Vec::new(),
            circuit_breaker_threshold: default_cb_threshold(),
            circuit_breaker_cooldown_secs: default_cb_cooldown(),
        }
    }
}

/// The full policy bundle resolved for one request's role(s).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RolePolicy {
    pub id: String,
    #[serde(default)]
    pub model_restriction: ModelRestriction,
    #[serde(default)]
    pub prompt: PromptPolicy,
    #[serde(default)]
    pub tool: ToolPolicy,
    #[serde(default)]
    pub rate_limit: RateLimitPolicy,
    #[serde(default)]
    pub budget: BudgetPolicy,
    #[serde(default)]
    pub caching: CachingPolicy,
    #[serde(default)]
    pub routing: RoutingPolicy,
    #[serde(default)]
    pub resilience: ResiliencePolicy,
}
