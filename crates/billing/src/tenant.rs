//! Tenant record and subscription status model

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingError;
use crate::plans::Plan;

/// Billing status of a tenant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Trial,
    Active,
    PastDue,
    Cancelled,
    TrialExpired,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 5] = [
        SubscriptionStatus::Trial,
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Cancelled,
        SubscriptionStatus::TrialExpired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::TrialExpired => "trial_expired",
        }
    }

    /// Statuses backed by a paid relationship with the processor
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::PastDue | SubscriptionStatus::Cancelled
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Cancelled)
    }

    /// Legal edges of the lifecycle state machine.
    ///
    /// | From          | To                          |
    /// |---------------|-----------------------------|
    /// | trial         | active, trial_expired       |
    /// | trial_expired | active                      |
    /// | active        | past_due, cancelled         |
    /// | past_due      | active, cancelled           |
    /// | cancelled     | (terminal)                  |
    /// | *any*         | same status                 |
    pub fn can_transition_to(&self, target: &SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        self == target
            || matches!(
                (self, target),
                (Trial, Active)
                    | (Trial, TrialExpired)
                    | (TrialExpired, Active)
                    | (Active, PastDue)
                    | (Active, Cancelled)
                    | (PastDue, Active)
                    | (PastDue, Cancelled)
            )
    }

    /// Map a processor-reported subscription status onto ours.
    ///
    /// Processor states with no counterpart here (`trialing`, `incomplete`,
    /// `paused`) return `None`.
    pub fn from_processor(status: &str) -> Option<Self> {
        match status {
            "active" => Some(SubscriptionStatus::Active),
            "past_due" | "unpaid" => Some(SubscriptionStatus::PastDue),
            "canceled" | "cancelled" | "incomplete_expired" => Some(SubscriptionStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(SubscriptionStatus::Trial),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "trial_expired" => Ok(SubscriptionStatus::TrialExpired),
            other => Err(BillingError::Internal(format!(
                "Unknown subscription status: {}",
                other
            ))),
        }
    }
}

/// Whether the hosted assistant currently answers calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Active,
    Suspended,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Suspended => "suspended",
        }
    }
}

impl std::str::FromStr for ServiceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ServiceStatus::Active),
            "suspended" => Ok(ServiceStatus::Suspended),
            other => Err(BillingError::Internal(format!(
                "Unknown service status: {}",
                other
            ))),
        }
    }
}

/// A business subscribed to the hosted voice assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub business_name: String,
    /// Recipient of lifecycle emails
    pub billing_email: String,
    /// Hosted assistant reference, set once the assistant is provisioned
    pub assistant_id: Option<String>,
    pub subscription_status: SubscriptionStatus,
    pub plan: Option<Plan>,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub calls_this_month: i64,
    pub service_status: ServiceStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Tenant {
    /// A freshly signed-up tenant on a trial ending at `trial_ends_at`
    pub fn new_trial(
        business_name: impl Into<String>,
        billing_email: impl Into<String>,
        trial_ends_at: OffsetDateTime,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            business_name: business_name.into(),
            billing_email: billing_email.into(),
            assistant_id: None,
            subscription_status: SubscriptionStatus::Trial,
            plan: None,
            trial_ends_at: Some(trial_ends_at),
            external_customer_id: None,
            external_subscription_id: None,
            calls_this_month: 0,
            service_status: ServiceStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Consistency rules that must hold for every stored tenant
    pub fn invariant_violations(&self) -> Vec<&'static str> {
        let mut violations = Vec::new();
        let in_trial = self.subscription_status == SubscriptionStatus::Trial;

        if in_trial && self.trial_ends_at.is_none() {
            violations.push("trial_without_end");
        }
        if !in_trial && self.trial_ends_at.is_some() {
            violations.push("trial_end_outside_trial");
        }
        if self.external_subscription_id.is_some() && !self.subscription_status.is_paid() {
            violations.push("subscription_id_without_paid_status");
        }
        violations
    }

    /// Apply a committed update to the in-memory record
    pub fn apply(&mut self, update: &TenantUpdate, now: OffsetDateTime) {
        self.subscription_status = update.status;
        if update.clear_trial_ends_at {
            self.trial_ends_at = None;
        }
        if let Some(plan) = &update.plan {
            self.plan = Some(plan.clone());
        }
        if let Some(customer_id) = &update.external_customer_id {
            self.external_customer_id = Some(customer_id.clone());
        }
        if let Some(subscription_id) = &update.external_subscription_id {
            self.external_subscription_id = Some(subscription_id.clone());
        }
        if update.reset_usage {
            self.calls_this_month = 0;
        }
        self.updated_at = now;
    }
}

/// Fields written together with a status change
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TenantUpdate {
    pub status: SubscriptionStatus,
    pub clear_trial_ends_at: bool,
    pub plan: Option<Plan>,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub reset_usage: bool,
}

impl TenantUpdate {
    pub fn status(status: SubscriptionStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}
