//! State reconciler
//!
//! The single writer of tenant subscription status. Both the trial sweep and
//! processor webhooks hand it a [`TransitionRequest`]; it resolves the tenant,
//! drops requests it has already applied, looks up the transition rule for
//! the stored status and commits the change with a conditional update.
//!
//! Side effects (assistant toggle, email) are returned as a
//! [`SideEffectPlan`] and only ever planned after the status write commits,
//! so a persistence failure never leaves a stray email or suspension behind.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::assistant::{ServiceController, ToggleOutcome};
use crate::email::{DispatchOutcome, EmailCategory, NotificationDispatcher, TemplateContext};
use crate::error::BillingResult;
use crate::events::{ActorType, AuditLog, BillingEventBuilder};
use crate::plans::{Plan, PlanName};
use crate::store::{TenantStore, UpdateOutcome};
use crate::tenant::{SubscriptionStatus, Tenant, TenantUpdate};
use crate::transitions::{EventKind, ServiceAction, TransitionTable};

/// How a request identifies its tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantRef {
    Id(Uuid),
    /// Processor customer reference
    ExternalCustomer(String),
}

impl std::fmt::Display for TenantRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TenantRef::Id(id) => write!(f, "{}", id),
            TenantRef::ExternalCustomer(customer) => write!(f, "customer {}", customer),
        }
    }
}

/// A request to move one tenant through the lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
    pub tenant: TenantRef,
    pub event: EventKind,
    pub actor: ActorType,
    /// Processor event id; the idempotency key for webhook events
    pub external_event_id: Option<String>,
    /// Idempotency key for cron-originated events
    pub dedupe_key: Option<String>,
    pub plan: Option<PlanName>,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    /// Subscription status as the processor reports it
    pub reported_status: Option<SubscriptionStatus>,
    pub days_left: Option<i64>,
    pub amount_cents: Option<i64>,
    pub invoice_url: Option<String>,
}

impl TransitionRequest {
    pub fn new(tenant: TenantRef, event: EventKind, actor: ActorType) -> Self {
        Self {
            tenant,
            event,
            actor,
            external_event_id: None,
            dedupe_key: None,
            plan: None,
            external_customer_id: None,
            external_subscription_id: None,
            reported_status: None,
            days_left: None,
            amount_cents: None,
            invoice_url: None,
        }
    }

    /// Key side effects are deduplicated on. A dedupe key wins over the
    /// event id so two processor events describing the same fact (an invoice
    /// reported as both `paid` and `payment_succeeded`) share it.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.dedupe_key
            .as_deref()
            .or(self.external_event_id.as_deref())
    }

    /// Every key the audit log may already hold for this request
    pub fn audit_keys(&self) -> impl Iterator<Item = &str> {
        self.external_event_id
            .as_deref()
            .into_iter()
            .chain(self.dedupe_key.as_deref())
    }

    fn audit_metadata(&self) -> serde_json::Value {
        let mut data = json!({ "event": self.event.as_str() });
        if let Some(plan) = self.plan {
            data["plan"] = json!(plan.as_str());
        }
        if let Some(subscription_id) = &self.external_subscription_id {
            data["subscription_id"] = json!(subscription_id);
        }
        if let Some(reported) = self.reported_status {
            data["reported_status"] = json!(reported.as_str());
        }
        if let Some(days_left) = self.days_left {
            data["days_left"] = json!(days_left);
        }
        if let Some(amount) = self.amount_cents {
            data["amount_cents"] = json!(amount);
        }
        data
    }
}

/// Email planned for a committed transition
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedNotification {
    pub category: EmailCategory,
    pub context: TemplateContext,
    /// Key the notification log deduplicates on
    pub transition_key: String,
}

/// Side effects owed for a committed transition
#[derive(Debug, Clone, PartialEq)]
pub struct SideEffectPlan {
    pub tenant: Tenant,
    pub service: Option<ServiceAction>,
    pub notification: Option<PlannedNotification>,
}

impl SideEffectPlan {
    pub fn is_empty(&self) -> bool {
        self.service.is_none() && self.notification.is_none()
    }
}

/// What executing a plan did
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SideEffectReport {
    pub service: Option<ToggleOutcome>,
    pub notification: Option<DispatchOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Applied {
        previous: SubscriptionStatus,
        tenant: Tenant,
        effects: SideEffectPlan,
    },
    /// The idempotency key is already in the audit log
    Duplicate,
    TenantNotFound,
    /// No rule for the stored status, or its guard refused
    NotApplicable { status: SubscriptionStatus },
    /// The stored status changed between read and write
    RaceLost,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied { .. } => "applied",
            ReconcileOutcome::Duplicate => "duplicate",
            ReconcileOutcome::TenantNotFound => "tenant_not_found",
            ReconcileOutcome::NotApplicable { .. } => "not_applicable",
            ReconcileOutcome::RaceLost => "race_lost",
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied { .. })
    }
}

#[derive(Clone)]
pub struct StateReconciler {
    store: Arc<dyn TenantStore>,
    audit: Arc<dyn AuditLog>,
    table: Arc<TransitionTable>,
    dispatcher: NotificationDispatcher,
    controller: ServiceController,
}

impl StateReconciler {
    pub fn new(
        store: Arc<dyn TenantStore>,
        audit: Arc<dyn AuditLog>,
        table: Arc<TransitionTable>,
        dispatcher: NotificationDispatcher,
        controller: ServiceController,
    ) -> Self {
        Self {
            store,
            audit,
            table,
            dispatcher,
            controller,
        }
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    async fn resolve(&self, tenant: &TenantRef) -> BillingResult<Option<Tenant>> {
        match tenant {
            TenantRef::Id(id) => self.store.get(*id).await,
            TenantRef::ExternalCustomer(customer_id) => {
                self.store.get_by_external_customer_id(customer_id).await
            }
        }
    }

    /// Commit the status change for `request`, without running side effects.
    ///
    /// Returns `Err` only when the store could not be read or written; in
    /// that case nothing has changed and nothing is owed.
    pub async fn apply(&self, request: &TransitionRequest) -> BillingResult<ReconcileOutcome> {
        let Some(tenant) = self.resolve(&request.tenant).await? else {
            tracing::warn!(
                tenant = %request.tenant,
                event = %request.event,
                "Transition request for unknown tenant - acknowledging"
            );
            return Ok(ReconcileOutcome::TenantNotFound);
        };

        for key in request.audit_keys() {
            if self.audit.contains(tenant.id, key).await? {
                tracing::info!(
                    tenant_id = %tenant.id,
                    event = %request.event,
                    idempotency_key = %key,
                    "Event already applied - skipping"
                );
                return Ok(ReconcileOutcome::Duplicate);
            }
        }

        let previous = tenant.subscription_status;
        let Some(rule) = self.table.lookup(previous, request.event) else {
            tracing::info!(
                tenant_id = %tenant.id,
                status = %previous,
                event = %request.event,
                "No transition for current status - ignoring"
            );
            return Ok(ReconcileOutcome::NotApplicable { status: previous });
        };

        if !rule.guard_allows(tenant.external_subscription_id.is_some()) {
            tracing::info!(
                tenant_id = %tenant.id,
                status = %previous,
                event = %request.event,
                "Transition guard refused - tenant already converted"
            );
            return Ok(ReconcileOutcome::NotApplicable { status: previous });
        }

        let target = rule.resolve_target(request.reported_status);
        let mut update = TenantUpdate {
            status: target,
            clear_trial_ends_at: rule.fields.clear_trial_ends_at,
            reset_usage: rule.fields.reset_usage,
            ..TenantUpdate::default()
        };
        if rule.fields.assign_subscription {
            update.plan = request.plan.map(Plan::new);
            update.external_customer_id = request.external_customer_id.clone();
            update.external_subscription_id = request.external_subscription_id.clone();
            if update.plan.is_none() {
                tracing::warn!(
                    tenant_id = %tenant.id,
                    "Activating subscription without a known plan - keeping stored plan"
                );
            }
        }

        let updated = match self
            .store
            .conditional_update(tenant.id, previous, &update)
            .await?
        {
            UpdateOutcome::Updated(updated) => updated,
            UpdateOutcome::GuardFailed => {
                tracing::info!(
                    tenant_id = %tenant.id,
                    expected = %previous,
                    event = %request.event,
                    "Status changed concurrently - transition superseded"
                );
                return Ok(ReconcileOutcome::RaceLost);
            }
            UpdateOutcome::NotFound => return Ok(ReconcileOutcome::TenantNotFound),
        };

        let mut builder = BillingEventBuilder::new(tenant.id, rule.audit)
            .statuses(previous, target)
            .actor_type(request.actor)
            .data(request.audit_metadata());
        if let Some(event_id) = &request.external_event_id {
            builder = builder.stripe_event(event_id);
        }
        if let Some(key) = &request.dedupe_key {
            builder = builder.dedupe_key(key.clone());
        }
        let record = builder.build();

        match self.audit.append(&record).await {
            Ok(true) => {}
            Ok(false) => {
                // A concurrent delivery of the same event recorded first and
                // owns the side effects
                tracing::info!(
                    tenant_id = %tenant.id,
                    event = %request.event,
                    "Concurrent delivery already recorded this event"
                );
                return Ok(ReconcileOutcome::Duplicate);
            }
            Err(e) => {
                tracing::error!(
                    tenant_id = %tenant.id,
                    event = %request.event,
                    error = %e,
                    "Failed to append audit record"
                );
            }
        }

        tracing::info!(
            tenant_id = %tenant.id,
            event = %request.event,
            from = %previous,
            to = %target,
            "Subscription transition applied"
        );

        let transition_key = request
            .idempotency_key()
            .map(str::to_string)
            .unwrap_or_else(|| record.id.to_string());

        let notification = rule.notify.map(|category| {
            let mut context = TemplateContext::for_tenant(&updated);
            context.days_left = request.days_left;
            context.amount_cents = request.amount_cents;
            context.invoice_url = request.invoice_url.clone();
            PlannedNotification {
                category,
                context,
                transition_key,
            }
        });

        let effects = SideEffectPlan {
            tenant: updated.clone(),
            service: rule.service,
            notification,
        };

        Ok(ReconcileOutcome::Applied {
            previous,
            tenant: updated,
            effects,
        })
    }

    /// Run the planned side effects. Failures are logged, never returned.
    pub async fn execute(&self, plan: &SideEffectPlan) -> SideEffectReport {
        let mut report = SideEffectReport::default();

        if let Some(action) = plan.service {
            let outcome = match action {
                ServiceAction::Suspend => self.controller.suspend(&plan.tenant).await,
                ServiceAction::Reactivate => self.controller.reactivate(&plan.tenant).await,
            };
            report.service = Some(outcome);
        }

        if let Some(notification) = &plan.notification {
            let outcome = self
                .dispatcher
                .dispatch(
                    &plan.tenant,
                    notification.category,
                    &notification.context,
                    &notification.transition_key,
                )
                .await;
            report.notification = Some(outcome);
        }

        report
    }

    /// Apply a request and run its side effects inline
    pub async fn process(&self, request: &TransitionRequest) -> BillingResult<ReconcileOutcome> {
        let outcome = self.apply(request).await?;
        if let ReconcileOutcome::Applied { effects, .. } = &outcome {
            self.execute(effects).await;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::AssistantMode;
    use crate::memory::{
        InMemoryAuditLog, InMemoryNotificationLog, InMemoryTenantStore, RecordingAssistantClient,
        RecordingEmailSender,
    };
    use crate::tenant::ServiceStatus;
    use time::{Duration, OffsetDateTime};

    struct Harness {
        store: Arc<InMemoryTenantStore>,
        audit: Arc<InMemoryAuditLog>,
        email: Arc<RecordingEmailSender>,
        assistant: Arc<RecordingAssistantClient>,
        reconciler: StateReconciler,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryTenantStore::default());
        let audit = Arc::new(InMemoryAuditLog::default());
        let email = Arc::new(RecordingEmailSender::default());
        let assistant = Arc::new(RecordingAssistantClient::default());
        let dispatcher =
            NotificationDispatcher::new(email.clone(), Arc::new(InMemoryNotificationLog::default()));
        let controller = ServiceController::new(assistant.clone(), store.clone());
        let reconciler = StateReconciler::new(
            store.clone(),
            audit.clone(),
            Arc::new(TransitionTable::standard().unwrap()),
            dispatcher,
            controller,
        );
        Harness {
            store,
            audit,
            email,
            assistant,
            reconciler,
        }
    }

    fn active_tenant() -> Tenant {
        let mut tenant = Tenant::new_trial("Ace HVAC", "billing@ace.test", OffsetDateTime::now_utc());
        tenant.subscription_status = SubscriptionStatus::Active;
        tenant.trial_ends_at = None;
        tenant.plan = Some(Plan::new(PlanName::Starter));
        tenant.external_customer_id = Some("cus_ace".to_string());
        tenant.external_subscription_id = Some("sub_ace".to_string());
        tenant.assistant_id = Some("asst_ace".to_string());
        tenant
    }

    fn webhook(event: EventKind, event_id: &str) -> TransitionRequest {
        let mut request = TransitionRequest::new(
            TenantRef::ExternalCustomer("cus_ace".to_string()),
            event,
            ActorType::Stripe,
        );
        request.external_event_id = Some(event_id.to_string());
        request
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_not_found() {
        let h = harness();
        let outcome = h
            .reconciler
            .process(&webhook(EventKind::InvoicePaid, "evt_1"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::TenantNotFound);
    }

    #[tokio::test]
    async fn test_subscription_deleted_cancels_and_notifies() {
        let h = harness();
        let tenant = active_tenant();
        h.store.insert(tenant.clone()).await;

        let outcome = h
            .reconciler
            .process(&webhook(EventKind::SubscriptionDeleted, "evt_del"))
            .await
            .unwrap();

        assert!(outcome.is_applied());
        let stored = h.store.get(tenant.id).await.unwrap().unwrap();
        assert_eq!(stored.subscription_status, SubscriptionStatus::Cancelled);

        let sent = h.email.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("cancelled"));

        let records = h.audit.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].previous_status, SubscriptionStatus::Active);
        assert_eq!(records[0].new_status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_tenant_ignores_payment_events() {
        let h = harness();
        let mut tenant = active_tenant();
        tenant.subscription_status = SubscriptionStatus::Cancelled;
        h.store.insert(tenant.clone()).await;

        let outcome = h
            .reconciler
            .process(&webhook(EventKind::InvoicePaymentFailed, "evt_late"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::NotApplicable {
                status: SubscriptionStatus::Cancelled
            }
        );
        assert!(h.email.sent().await.is_empty());
        assert!(h.audit.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscription_updated_mirrors_paid_status_without_email() {
        let h = harness();
        let tenant = active_tenant();
        h.store.insert(tenant.clone()).await;

        let mut request = webhook(EventKind::SubscriptionUpdated, "evt_upd");
        request.reported_status = Some(SubscriptionStatus::PastDue);
        let outcome = h.reconciler.process(&request).await.unwrap();

        assert!(outcome.is_applied());
        let stored = h.store.get(tenant.id).await.unwrap().unwrap();
        assert_eq!(stored.subscription_status, SubscriptionStatus::PastDue);
        assert!(h.email.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_plans_but_does_not_run_side_effects() {
        let h = harness();
        let mut tenant = Tenant::new_trial(
            "Ace HVAC",
            "billing@ace.test",
            OffsetDateTime::now_utc() - Duration::hours(1),
        );
        tenant.assistant_id = Some("asst_ace".to_string());
        h.store.insert(tenant.clone()).await;

        let mut request =
            TransitionRequest::new(TenantRef::Id(tenant.id), EventKind::TrialExpired, ActorType::Scheduler);
        request.dedupe_key = Some(format!("trial_expired:{}", tenant.id));

        let outcome = h.reconciler.apply(&request).await.unwrap();
        let ReconcileOutcome::Applied { effects, .. } = outcome else {
            panic!("expected applied, got {:?}", outcome);
        };
        assert_eq!(effects.service, Some(ServiceAction::Suspend));
        assert!(h.assistant.calls().await.is_empty());
        assert!(h.email.sent().await.is_empty());

        let report = h.reconciler.execute(&effects).await;
        assert_eq!(report.service, Some(ToggleOutcome::Applied));
        assert!(matches!(report.notification, Some(DispatchOutcome::Sent { .. })));
        assert_eq!(
            h.assistant.calls().await,
            vec![("asst_ace".to_string(), AssistantMode::Suspended)]
        );
        let stored = h.store.get(tenant.id).await.unwrap().unwrap();
        assert_eq!(stored.service_status, ServiceStatus::Suspended);
    }

    #[tokio::test]
    async fn test_persistence_failure_has_no_side_effects() {
        let h = harness();
        h.store.insert(active_tenant()).await;
        h.store.fail_writes(true);

        let result = h
            .reconciler
            .process(&webhook(EventKind::InvoicePaymentFailed, "evt_fail"))
            .await;

        assert!(result.is_err());
        assert!(h.email.sent().await.is_empty());
        assert!(h.audit.records().await.is_empty());
    }
}
