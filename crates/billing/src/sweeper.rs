//! Trial sweep
//!
//! Periodic scan for time-based transitions. The sweep only selects tenants
//! and emits transition requests; every status change goes through the
//! reconciler, which owns the guards.

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::events::ActorType;
use crate::reconciler::{ReconcileOutcome, StateReconciler, TenantRef, TransitionRequest};
use crate::tenant::Tenant;
use crate::transitions::EventKind;

const SECONDS_PER_DAY: i64 = 86_400;

/// Whole days left in a trial, rounded up
pub fn days_left(trial_ends_at: OffsetDateTime, now: OffsetDateTime) -> i64 {
    let seconds = (trial_ends_at - now).whole_seconds();
    if seconds <= 0 {
        0
    } else {
        (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
    }
}

/// Dedupe key for a trial reminder
pub fn reminder_key(tenant: &Tenant, trial_ends_at: OffsetDateTime, days_left: i64) -> String {
    format!(
        "trial_reminder:{}:{}:{}",
        tenant.id,
        trial_ends_at.unix_timestamp(),
        days_left
    )
}

/// Dedupe key for a trial expiry
pub fn expiry_key(tenant: &Tenant, trial_ends_at: OffsetDateTime) -> String {
    format!("trial_expired:{}:{}", tenant.id, trial_ends_at.unix_timestamp())
}

/// Counts from one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub reminder_candidates: usize,
    pub reminders_sent: usize,
    pub expiry_candidates: usize,
    pub expired: usize,
    /// Past trial end but already holding a processor subscription
    pub skipped_converted: usize,
    /// Already handled by an earlier sweep, or superseded by a webhook
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct TrialSweeper {
    reconciler: StateReconciler,
    reminder_window: Duration,
}

impl TrialSweeper {
    pub fn new(reconciler: StateReconciler) -> Self {
        Self {
            reconciler,
            reminder_window: Duration::hours(24),
        }
    }

    /// Run the expiring-soon pass, then the expired pass
    pub async fn run(&self, now: OffsetDateTime) -> SweepSummary {
        let mut summary = SweepSummary::default();

        self.remind_expiring(now, &mut summary).await;
        self.expire_trials(now, &mut summary).await;

        tracing::info!(
            reminder_candidates = summary.reminder_candidates,
            reminders_sent = summary.reminders_sent,
            expiry_candidates = summary.expiry_candidates,
            expired = summary.expired,
            skipped_converted = summary.skipped_converted,
            skipped = summary.skipped,
            errors = summary.errors,
            "Trial sweep completed"
        );
        summary
    }

    async fn remind_expiring(&self, now: OffsetDateTime, summary: &mut SweepSummary) {
        let candidates = match self
            .reconciler
            .store()
            .list_trials_ending_between(now, now + self.reminder_window)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list expiring trials");
                summary.errors += 1;
                return;
            }
        };
        summary.reminder_candidates = candidates.len();

        for tenant in candidates {
            let Some(trial_ends_at) = tenant.trial_ends_at else {
                continue;
            };
            let days = days_left(trial_ends_at, now);

            let mut request = TransitionRequest::new(
                TenantRef::Id(tenant.id),
                EventKind::TrialReminder,
                ActorType::Scheduler,
            );
            request.days_left = Some(days);
            request.dedupe_key = Some(reminder_key(&tenant, trial_ends_at, days));

            match self.reconciler.process(&request).await {
                Ok(ReconcileOutcome::Applied { .. }) => summary.reminders_sent += 1,
                Ok(_) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        tenant_id = %tenant.id,
                        error = %e,
                        "Trial reminder failed - continuing sweep"
                    );
                    summary.errors += 1;
                }
            }
        }
    }

    async fn expire_trials(&self, now: OffsetDateTime, summary: &mut SweepSummary) {
        let candidates = match self.reconciler.store().list_expired_trials(now).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list expired trials");
                summary.errors += 1;
                return;
            }
        };
        summary.expiry_candidates = candidates.len();

        for tenant in candidates {
            if tenant.external_subscription_id.is_some() {
                tracing::info!(
                    tenant_id = %tenant.id,
                    "Trial ended but tenant already subscribed - skipping expiry"
                );
                summary.skipped_converted += 1;
                continue;
            }
            let Some(trial_ends_at) = tenant.trial_ends_at else {
                continue;
            };

            let mut request = TransitionRequest::new(
                TenantRef::Id(tenant.id),
                EventKind::TrialExpired,
                ActorType::Scheduler,
            );
            request.dedupe_key = Some(expiry_key(&tenant, trial_ends_at));

            match self.reconciler.process(&request).await {
                Ok(ReconcileOutcome::Applied { .. }) => summary.expired += 1,
                Ok(_) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        tenant_id = %tenant.id,
                        error = %e,
                        "Trial expiry failed - continuing sweep"
                    );
                    summary.errors += 1;
                }
            }
        }
    }
}
