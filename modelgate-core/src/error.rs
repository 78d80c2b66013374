//! Error taxonomy (§7): stable `code` strings, HTTP status, and propagation class.
//!
//! Policy-class errors are terminal and never retried. Resilience-class
//! errors are internal to the fallback chain and surface only once every
//! option is exhausted. `GatewayError::http_status` and `::code` are what the
//! HTTP layer uses to build the `{error:{message,type,code}}` envelope.

use thiserror::Error;

/// Broad propagation class, used by the resilience executor to decide
/// whether an error is worth retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Auth,
    PolicyModel,
    PolicyPrompt,
    PolicyTool,
    PolicyRate,
    PolicyBudget,
    Resilience,
    Upstream,
    System,
}

#[derive(Clone, Debug, Error)]
pub enum GatewayError {
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("api key required")]
    ApiKeyRequired,
    #[error("invalid tenant")]
    InvalidTenant,
    #[error("no role assigned")]
    NoRoleAssigned,
    #[error("no policy configured")]
    NoPolicyConfigured,

    #[error("Model '{0}' is not in the allowed list")]
    ModelNotAllowed(String),
    #[error("model '{0}' is blocked")]
    ModelBlocked(String),

    #[error("prompt exceeds maximum length")]
    PromptTooLong,
    #[error("too many messages in request")]
    TooManyMessages,
    #[error("blocked content: {0}")]
    BlockedContent(String),
    #[error("injection detected: {0}")]
    InjectionDetected(String),
    #[error("pii detected: {0}")]
    PiiDetected(String),

    #[error("tools are not allowed for this role")]
    ToolsNotAllowed,
    #[error("tool '{0}' is not allowed")]
    ToolNotAllowed(String),
    #[error("tool '{0}' is blocked")]
    ToolBlocked(String),
    #[error("too many tools requested")]
    TooManyTools,

    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("token rate limit exceeded")]
    TokenRateLimitExceeded,

    #[error("budget exceeded")]
    BudgetExceeded,
    #[error("per-request budget cap exceeded")]
    BudgetPerRequestExceeded,

    #[error("circuit open for provider {0}")]
    CircuitOpen(String),
    #[error("all providers unavailable (circuit breakers open)")]
    AllProvidersUnavailable,

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("policy store unavailable: {0}")]
    PolicyStoreUnavailable(String),
    #[error("policy load failed: {0}")]
    PolicyLoadFailed(String),
    #[error("credential decrypt failed")]
    CredentialDecryptFailed,

    #[error("max retries exceeded: {0}")]
    MaxRetriesExceeded(String),

    #[error("ambiguous model string '{0}': resolves to more than one provider")]
    AmbiguousModel(String),
}

impl GatewayError {
    /// The stable machine-readable error code (§7 table).
    pub fn code(&self) -> &'static str {
        use GatewayError::*;
        match self {
            AuthenticationRequired => "authentication_required",
            ApiKeyRequired => "api_key_required",
            InvalidTenant => "invalid_tenant",
            NoRoleAssigned => "no_role_assigned",
            NoPolicyConfigured => "no_policy_configured",
            ModelNotAllowed(_) => "model_not_allowed",
            ModelBlocked(_) => "model_blocked",
            PromptTooLong => "prompt_too_long",
            TooManyMessages => "too_many_messages",
            BlockedContent(_) => "blocked_content",
            InjectionDetected(_) => "injection_detected",
            PiiDetected(_) => "pii_detected",
            ToolsNotAllowed => "tools_not_allowed",
            ToolNotAllowed(_) => "tool_not_allowed",
            ToolBlocked(_) => "tool_blocked",
            TooManyTools => "too_many_tools",
            RateLimitExceeded => "rate_limit_exceeded",
            TokenRateLimitExceeded => "token_rate_limit_exceeded",
            BudgetExceeded => "budget_exceeded",
            BudgetPerRequestExceeded => "budget_per_request_exceeded",
            CircuitOpen(_) => "circuit_open",
            AllProvidersUnavailable => "all_providers_unavailable",
            ProviderError(_) => "provider_error",
            PolicyStoreUnavailable(_) => "policy_store_unavailable",
            PolicyLoadFailed(_) => "policy_load_failed",
            CredentialDecryptFailed => "credential_decrypt_failed",
            MaxRetriesExceeded(_) => "provider_error",
            AmbiguousModel(_) => "model_not_allowed",
        }
    }

    pub fn http_status(&self) -> u16 {
        use GatewayError::*;
        match self {
            AuthenticationRequired | ApiKeyRequired | InvalidTenant | NoRoleAssigned
            | NoPolicyConfigured => 401,
            ModelNotAllowed(_) | ModelBlocked(_) | AmbiguousModel(_) => 403,
            PromptTooLong | TooManyMessages | BlockedContent(_) | InjectionDetected(_)
            | PiiDetected(_) | ToolsNotAllowed | ToolNotAllowed(_) | ToolBlocked(_)
            | TooManyTools => 400,
            RateLimitExceeded | TokenRateLimitExceeded => 429,
            BudgetExceeded | BudgetPerRequestExceeded => 402,
            CircuitOpen(_) | AllProvidersUnavailable => 503,
            ProviderError(_) | MaxRetriesExceeded(_) => 502,
            PolicyStoreUnavailable(_) | PolicyLoadFailed(_) | CredentialDecryptFailed => 503,
        }
    }

    pub fn class(&self) -> ErrorClass {
        use GatewayError::*;
        match self {
            AuthenticationRequired | ApiKeyRequired | InvalidTenant | NoRoleAssigned
            | NoPolicyConfigured => ErrorClass::Auth,
            ModelNotAllowed(_) | ModelBlocked(_) | AmbiguousModel(_) => ErrorClass::PolicyModel,
            PromptTooLong | TooManyMessages | BlockedContent(_) | InjectionDetected(_)
            | PiiDetected(_) => ErrorClass::PolicyPrompt,
            ToolsNotAllowed | ToolNotAllowed(_) | ToolBlocked(_) | TooManyTools => {
                ErrorClass::PolicyTool
            }
            RateLimitExceeded | TokenRateLimitExceeded => ErrorClass::PolicyRate,
            BudgetExceeded | BudgetPerRequestExceeded => ErrorClass::PolicyBudget,
            CircuitOpen(_) | AllProvidersUnavailable | MaxRetriesExceeded(_) => {
                ErrorClass::Resilience
            }
            ProviderError(_) => ErrorClass::Upstream,
            PolicyStoreUnavailable(_) | PolicyLoadFailed(_) | CredentialDecryptFailed => {
                ErrorClass::System
            }
        }
    }

    /// Policy-class errors are never retried (§7 propagation rule).
    pub fn is_policy(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Auth
                | ErrorClass::PolicyModel
                | ErrorClass::PolicyPrompt
                | ErrorClass::PolicyTool
                | ErrorClass::PolicyRate
                | ErrorClass::PolicyBudget
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_not_allowed_maps_to_403_and_stable_code() {
        let err = GatewayError::ModelNotAllowed("openai/gpt-4".into());
        assert_eq!(err.http_status(), 403);
        assert_eq!(err.code(), "model_not_allowed");
        assert_eq!(
            err.to_string(),
            "Model 'openai/gpt-4' is not in the allowed list"
        );
    }

    #[test]
    fn policy_errors_are_never_retried() {
        assert!(GatewayError::InjectionDetected("x".into()).is_policy());
        assert!(GatewayError::RateLimitExceeded.is_policy());
        assert!(!GatewayError::ProviderError("timeout".into()).is_policy());
    }

    #[test]
    fn system_errors_map_to_503() {
        assert_eq!(
            GatewayError::PolicyStoreUnavailable("db down".into()).http_status(),
            503
        );
    }
}
