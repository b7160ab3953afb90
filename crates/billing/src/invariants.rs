//! Lifecycle invariants
//!
//! Read-only consistency checks over the `clients` table. Each check is a
//! single SQL query; run them after a webhook replay or on a schedule to
//! catch tenants whose status, trial window, and service toggle disagree.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    pub tenant_ids: Vec<Uuid>,
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// A tenant is served (or refused) contrary to what they pay for
    Critical,
    /// Data inconsistency that needs attention
    High,
    Medium,
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

impl InvariantCheckSummary {
    /// Build a summary from the violations of `checks_run` checks
    pub fn from_violations(
        checked_at: OffsetDateTime,
        checks_run: usize,
        violations: Vec<InvariantViolation>,
    ) -> Self {
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        Self {
            checked_at,
            checks_run,
            checks_passed: checks_run.saturating_sub(checks_failed),
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        }
    }
}

/// A tenant row flagged by one of the checks
#[derive(Debug, sqlx::FromRow)]
struct FlaggedTenantRow {
    id: Uuid,
    business_name: String,
    subscription_status: String,
    service_status: String,
    trial_ends_at: Option<OffsetDateTime>,
    stripe_subscription_id: Option<String>,
}

struct Check {
    name: &'static str,
    severity: ViolationSeverity,
    description: &'static str,
    predicate: &'static str,
}

const CHECKS: &[Check] = &[
    Check {
        name: "trial_has_end_date",
        severity: ViolationSeverity::High,
        description: "Tenant is in trial without a trial end date",
        predicate: "subscription_status = 'trial' AND trial_ends_at IS NULL",
    },
    Check {
        name: "trial_end_only_in_trial",
        severity: ViolationSeverity::Medium,
        description: "Tenant has a trial end date outside of trial",
        predicate: "subscription_status <> 'trial' AND trial_ends_at IS NOT NULL",
    },
    Check {
        name: "subscription_implies_paid_history",
        severity: ViolationSeverity::High,
        description: "Tenant has a processor subscription but never left trial",
        predicate: "stripe_subscription_id IS NOT NULL \
                    AND subscription_status IN ('trial', 'trial_expired')",
    },
    Check {
        name: "expired_trial_is_suspended",
        severity: ViolationSeverity::Critical,
        description: "Expired trial still has full service",
        predicate: "subscription_status = 'trial_expired' AND service_status = 'active'",
    },
    Check {
        name: "active_is_served",
        severity: ViolationSeverity::Critical,
        description: "Paying tenant is suspended",
        predicate: "subscription_status = 'active' AND service_status = 'suspended'",
    },
];

/// Service for running lifecycle invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        for check in CHECKS {
            violations.extend(self.run_check(check).await?);
        }

        let summary = InvariantCheckSummary::from_violations(now, CHECKS.len(), violations);
        if summary.healthy {
            tracing::info!(checks_run = summary.checks_run, "Lifecycle invariants hold");
        } else {
            tracing::warn!(
                checks_failed = summary.checks_failed,
                violations = summary.violations.len(),
                "Lifecycle invariant violations found"
            );
        }
        Ok(summary)
    }

    async fn run_check(&self, check: &Check) -> BillingResult<Vec<InvariantViolation>> {
        let sql = format!(
            "SELECT id, business_name, subscription_status, service_status, \
             trial_ends_at, stripe_subscription_id \
             FROM clients WHERE {} ORDER BY created_at",
            check.predicate
        );
        let rows: Vec<FlaggedTenantRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|row| violation(check, row)).collect())
    }
}

fn violation(check: &Check, row: FlaggedTenantRow) -> InvariantViolation {
    InvariantViolation {
        invariant: check.name.to_string(),
        tenant_ids: vec![row.id],
        description: format!("{}: '{}'", check.description, row.business_name),
        context: serde_json::json!({
            "business_name": row.business_name,
            "subscription_status": row.subscription_status,
            "service_status": row.service_status,
            "trial_ends_at": row.trial_ends_at,
            "stripe_subscription_id": row.stripe_subscription_id,
        }),
        severity: check.severity,
    }
}
