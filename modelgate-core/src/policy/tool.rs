//! Stage 3: tool checks (§4.1).
//!
//! If tools are present but tool-calling is disabled, reject. Otherwise
//! filter the catalog: DENIED tools reject the request only when explicitly
//! requested, REMOVED tools are stripped silently, PENDING tools are
//! treated as DENIED by default.

use gateway_config::{ToolPolicy, ToolStatus};

use crate::error::GatewayError;
use crate::message::ToolSpec;

/// Filters `tools` against `policy`, returning the subset the request is
/// allowed to see. Mutates nothing; the caller substitutes the result into
/// the request (or the `PolicyDecisions` record) before dispatch.
pub fn check_and_filter(
    tools: &[ToolSpec],
    requested_tool_names: &[String],
    policy: &ToolPolicy,
) -> Result<Vec<ToolSpec>, GatewayError> {
    if tools.is_empty() {
        return Ok(Vec::new());
    }
    if !policy.enabled || !policy.tools_allowed {
        return Err(GatewayError::ToolsNotAllowed);
    }

    let mut filtered = Vec::with_capacity(tools.len());
    for tool in tools {
        let status = policy
            .statuses
            .get(&tool.name)
            .copied()
            .unwrap_or(ToolStatus::Pending);
        match status {
            ToolStatus::Removed => continue,
            ToolStatus::Denied | ToolStatus::Pending => {
                if requested_tool_names.iter().any(|n| n == &tool.name) {
                    return Err(GatewayError::ToolNotAllowed(tool.name.clone()));
                }
                // Not explicitly requested: silently excluded, same as REMOVED.
            }
            ToolStatus::Allowed => filtered.push(tool.clone()),
        }
    }

    if let Some(max) = policy.max_tools_per_request {
        if filtered.len() > max {
            return Err(GatewayError::TooManyTools);
        }
    }

    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tool(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: None,
            parameters: serde_json::json!({}),
        }
    }

    #[test]
    fn tools_present_but_disabled_is_rejected() {
        let policy = ToolPolicy::default();
        let err = check_and_filter(&[tool("search")], &[], &policy).unwrap_err();
        assert!(matches!(err, GatewayError::ToolsNotAllowed));
    }

    #[test]
    fn no_tools_requested_is_always_ok() {
        let policy = ToolPolicy::default();
        assert!(check_and_filter(&[], &[], &policy).unwrap().is_empty());
    }

    #[test]
    fn explicitly_denied_tool_rejects_when_requested() {
        let mut statuses = HashMap::new();
        statuses.insert("search".to_string(), ToolStatus::Denied);
        let policy = ToolPolicy {
            enabled: true,
            tools_allowed: true,
            statuses,
            max_tools_per_request: None,
        };
        let err = check_and_filter(&[tool("search")], &["search".to_string()], &policy)
            .unwrap_err();
        assert!(matches!(err, GatewayError::ToolNotAllowed(_)));
    }

    #[test]
    fn removed_tool_is_stripped_silently_even_when_requested() {
        let mut statuses = HashMap::new();
        statuses.insert("search".to_string(), ToolStatus::Removed);
        let policy = ToolPolicy {
            enabled: true,
            tools_allowed: true,
            statuses,
            max_tools_per_request: None,
        };
        let filtered =
            check_and_filter(&[tool("search")], &["search".to_string()], &policy).unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn every_tool_removed_proceeds_with_empty_catalog_no_error() {
        let mut statuses = HashMap::new();
        statuses.insert("a".to_string(), ToolStatus::Removed);
        statuses.insert("b".to_string(), ToolStatus::Removed);
        let policy = ToolPolicy {
            enabled: true,
            tools_allowed: true,
            statuses,
            max_tools_per_request: None,
        };
        let result = check_and_filter(&[tool("a"), tool("b")], &[], &policy).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn pending_tool_is_treated_as_denied_by_default() {
        let policy = ToolPolicy {
            enabled: true,
            tools_allowed: true,
            statuses: HashMap::new(),
            max_tools_per_request: None,
        };
        let err = check_and_filter(&[tool("unknown")], &["unknown".to_string()], &policy)
            .unwrap_err();
        assert!(matches!(err, GatewayError::ToolNotAllowed(_)));
    }

    #[test]
    fn allowed_tool_passes_through() {
        let mut statuses = HashMap::new();
        statuses.insert("search".to_string(), ToolStatus::Allowed);
        let policy = ToolPolicy {
            enabled: true,
            tools_allowed: true,
            statuses,
            max_tools_per_request: None,
        };
        let filtered = check_and_filter(&[tool("search")], &[], &policy).unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn max_tools_per_request_enforced() {
        let mut statuses = HashMap::new();
        statuses.insert("a".to_string(), ToolStatus::Allowed);
        statuses.insert("b".to_string(), ToolStatus::Allowed);
        let policy = ToolPolicy {
            enabled: true,
            tools_allowed: true,
            statuses,
            max_tools_per_request: Some(1),
        };
        let err = check_and_filter(&[tool("a"), tool("b")], &[], &policy).unwrap_err();
        assert!(matches!(err, GatewayError::TooManyTools));
    }
}
