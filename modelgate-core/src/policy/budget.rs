//! Stage 5: budget enforcement (§4.1).
//!
//! Checks the per-request cap against an estimated cost, then checks
//! daily/weekly/monthly spend against their caps (plus `soft_limit_pct`
//! headroom) before the request is allowed through. Actual spend is recorded
//! by the caller after the provider call completes, via [`record_usage`].

use gateway_config::{BudgetAction, BudgetPolicy};

use crate::error::GatewayError;
use crate::tenant::{BudgetPeriod, TenantScope};

/// One period's cap check result, used by the HTTP layer to emit warning
/// headers even when the request is allowed through.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BudgetAlert {
    Ok,
    Warning,
    Critical,
}

fn period_cap(policy: &BudgetPolicy, period: BudgetPeriod) -> Option<f64> {
    match period {
        BudgetPeriod::Day => policy.daily_usd,
        BudgetPeriod::Week => policy.weekly_usd,
        BudgetPeriod::Month => policy.monthly_usd,
    }
}

fn alert_for(usage: f64, cap: f64, policy: &BudgetPolicy) -> BudgetAlert {
    if cap <= 0.0 {
        return BudgetAlert::Ok;
    }
    let pct = usage / cap * 100.0;
    if pct >= policy.critical_threshold_pct {
        BudgetAlert::Critical
    } else if pct >= policy.warning_threshold_pct {
        BudgetAlert::Warning
    } else {
        BudgetAlert::Ok
    }
}

/// Checks `estimated_cost_usd` against the per-request cap, then the
/// tenant's role's accumulated spend against every configured period cap.
/// Returns the worst alert level seen across all periods checked, so the
/// caller can surface a warning even on requests that are allowed through.
pub async fn check(
    scope: &TenantScope,
    role: &str,
    estimated_cost_usd: f64,
    policy: &BudgetPolicy,
) -> Result<BudgetAlert, GatewayError> {
    if !policy.enabled {
        return Ok(BudgetAlert::Ok);
    }

    if let Some(per_request_cap) = policy.per_request_usd {
        if estimated_cost_usd > per_request_cap {
            return Err(GatewayError::BudgetPerRequestExceeded);
        }
    }

    let port = scope.port();
    let mut worst = BudgetAlert::Ok;
    for period in [BudgetPeriod::Day, BudgetPeriod::Week, BudgetPeriod::Month] {
        let Some(cap) = period_cap(policy, period) else {
            continue;
        };
        let usage = port.budget_usage(&scope.tenant_id, role, period).await?;
        let projected = usage + estimated_cost_usd;
        let soft_cap = cap * (1.0 + policy.soft_limit_pct / 100.0);

        if projected > soft_cap {
            match policy.on_exceeded {
                BudgetAction::Block => return Err(GatewayError::BudgetExceeded),
                BudgetAction::Throttle => return Err(GatewayError::BudgetExceeded),
                BudgetAction::Warn => worst = BudgetAlert::Critical,
            }
        }

        let alert = alert_for(projected, cap, policy);
        if alert_rank(alert) > alert_rank(worst) {
            worst = alert;
        }
    }

    Ok(worst)
}

fn alert_rank(alert: BudgetAlert) -> u8 {
    match alert {
        BudgetAlert::Ok => 0,
        BudgetAlert::Warning => 1,
        BudgetAlert::Critical => 2,
    }
}

/// Records actual spend against every tracked period once a provider call
/// completes. Called unconditionally, even when budget enforcement is
/// disabled, so historical usage stays accurate if it's turned on later.
pub async fn record_usage(
    scope: &TenantScope,
    role: &str,
    cost_usd: f64,
) -> Result<(), GatewayError> {
    let port = scope.port();
    for period in [BudgetPeriod::Day, BudgetPeriod::Week, BudgetPeriod::Month] {
        port.budget_add_usage(&scope.tenant_id, role, period, cost_usd)
            .await?;
    }
    Ok(())
}
