//! Billing audit log
//!
//! Append-only ledger of lifecycle transitions. Besides the audit trail it
//! answers one question for the reconciler: has this event already been
//! applied to this tenant?

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::tenant::SubscriptionStatus;

/// Kinds of recorded lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventType {
    CheckoutCompleted,
    TrialReminderSent,
    TrialExpired,
    PaymentFailed,
    PaymentSucceeded,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionCancelled,
    TrialWillEnd,
}

impl BillingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventType::CheckoutCompleted => "checkout_completed",
            BillingEventType::TrialReminderSent => "trial_reminder_sent",
            BillingEventType::TrialExpired => "trial_expired",
            BillingEventType::PaymentFailed => "payment_failed",
            BillingEventType::PaymentSucceeded => "payment_succeeded",
            BillingEventType::SubscriptionCreated => "subscription_created",
            BillingEventType::SubscriptionUpdated => "subscription_updated",
            BillingEventType::SubscriptionCancelled => "subscription_cancelled",
            BillingEventType::TrialWillEnd => "trial_will_end",
        }
    }
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who originated a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// Payment processor webhook
    Stripe,
    /// Scheduled sweep
    Scheduler,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Stripe => "stripe",
            ActorType::Scheduler => "scheduler",
            ActorType::System => "system",
        }
    }
}

/// One audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: BillingEventType,
    /// Processor event id; `None` for cron-originated events
    pub external_event_id: Option<String>,
    /// Deterministic key for cron-originated events
    pub dedupe_key: Option<String>,
    pub previous_status: SubscriptionStatus,
    pub new_status: SubscriptionStatus,
    pub actor: ActorType,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
}

impl TransitionRecord {
    /// The key this record answers duplicate checks for
    pub fn idempotency_key(&self) -> Option<&str> {
        self.external_event_id
            .as_deref()
            .or(self.dedupe_key.as_deref())
    }
}

/// Builder for audit log entries
pub struct BillingEventBuilder {
    record: TransitionRecord,
}

impl BillingEventBuilder {
    pub fn new(tenant_id: Uuid, event_type: BillingEventType) -> Self {
        Self {
            record: TransitionRecord {
                id: Uuid::new_v4(),
                tenant_id,
                event_type,
                external_event_id: None,
                dedupe_key: None,
                previous_status: SubscriptionStatus::Trial,
                new_status: SubscriptionStatus::Trial,
                actor: ActorType::System,
                metadata: serde_json::Value::Null,
                created_at: OffsetDateTime::now_utc(),
            },
        }
    }

    pub fn stripe_event(mut self, event_id: &str) -> Self {
        self.record.external_event_id = Some(event_id.to_string());
        self
    }

    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.record.dedupe_key = Some(key.into());
        self
    }

    pub fn statuses(mut self, previous: SubscriptionStatus, new: SubscriptionStatus) -> Self {
        self.record.previous_status = previous;
        self.record.new_status = new;
        self
    }

    pub fn data(mut self, metadata: serde_json::Value) -> Self {
        self.record.metadata = metadata;
        self
    }

    pub fn actor_type(mut self, actor: ActorType) -> Self {
        self.record.actor = actor;
        self
    }

    pub fn build(self) -> TransitionRecord {
        self.record
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Whether a record keyed by `key` (external event id or dedupe key)
    /// already exists for this tenant
    async fn contains(&self, tenant_id: Uuid, key: &str) -> BillingResult<bool>;

    /// Append a record. Returns `false` when a record with the same key
    /// already exists, in which case nothing is written.
    async fn append(&self, record: &TransitionRecord) -> BillingResult<bool>;

    /// Most recent records for a tenant, newest first
    async fn list_for_tenant(&self, tenant_id: Uuid, limit: i64)
        -> BillingResult<Vec<TransitionRecord>>;
}

/// Row shape of the `billing_events` table
#[derive(Debug, sqlx::FromRow)]
struct BillingEventRow {
    id: Uuid,
    client_id: Uuid,
    event_type: String,
    stripe_event_id: Option<String>,
    dedupe_key: Option<String>,
    previous_status: String,
    new_status: String,
    actor_type: String,
    event_data: serde_json::Value,
    created_at: OffsetDateTime,
}

impl TryFrom<BillingEventRow> for TransitionRecord {
    type Error = BillingError;

    fn try_from(row: BillingEventRow) -> Result<Self, Self::Error> {
        let event_type = serde_json::from_value(serde_json::Value::String(row.event_type))
            .map_err(|e| BillingError::Internal(format!("Unknown billing event type: {}", e)))?;
        let actor = serde_json::from_value(serde_json::Value::String(row.actor_type))
            .map_err(|e| BillingError::Internal(format!("Unknown actor type: {}", e)))?;

        Ok(TransitionRecord {
            id: row.id,
            tenant_id: row.client_id,
            event_type,
            external_event_id: row.stripe_event_id,
            dedupe_key: row.dedupe_key,
            previous_status: row.previous_status.parse()?,
            new_status: row.new_status.parse()?,
            actor,
            metadata: row.event_data,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL-backed audit log
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for BillingEventLogger {
    async fn contains(&self, tenant_id: Uuid, key: &str) -> BillingResult<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM billing_events
            WHERE client_id = $1
              AND (stripe_event_id = $2 OR dedupe_key = $2)
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    async fn append(&self, record: &TransitionRecord) -> BillingResult<bool> {
        // Both keys carry partial unique indexes; a conflict on either means
        // the event is already recorded
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO billing_events (
                id, client_id, event_type, stripe_event_id, dedupe_key,
                previous_status, new_status, actor_type, event_data, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(record.tenant_id)
        .bind(record.event_type.as_str())
        .bind(record.external_event_id.as_deref())
        .bind(record.dedupe_key.as_deref())
        .bind(record.previous_status.as_str())
        .bind(record.new_status.as_str())
        .bind(record.actor.as_str())
        .bind(&record.metadata)
        .bind(record.created_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted.is_some())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<TransitionRecord>> {
        let rows: Vec<BillingEventRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, event_type, stripe_event_id, dedupe_key,
                   previous_status, new_status, actor_type, event_data, created_at
            FROM billing_events
            WHERE client_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransitionRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_keys_and_statuses() {
        let tenant_id = Uuid::new_v4();
        let record = BillingEventBuilder::new(tenant_id, BillingEventType::PaymentFailed)
            .stripe_event("evt_123")
            .statuses(SubscriptionStatus::Active, SubscriptionStatus::PastDue)
            .actor_type(ActorType::Stripe)
            .data(serde_json::json!({ "amount_due_cents": 4900 }))
            .build();

        assert_eq!(record.tenant_id, tenant_id);
        assert_eq!(record.idempotency_key(), Some("evt_123"));
        assert_eq!(record.previous_status, SubscriptionStatus::Active);
        assert_eq!(record.new_status, SubscriptionStatus::PastDue);
        assert_eq!(record.metadata["amount_due_cents"], 4900);
    }

    #[test]
    fn test_cron_records_key_on_dedupe_key() {
        let record = BillingEventBuilder::new(Uuid::new_v4(), BillingEventType::TrialReminderSent)
            .dedupe_key("trial_reminder:abc:1700000000:1")
            .actor_type(ActorType::Scheduler)
            .build();

        assert!(record.external_event_id.is_none());
        assert_eq!(record.idempotency_key(), Some("trial_reminder:abc:1700000000:1"));
    }

    #[test]
    fn test_event_type_serde_matches_as_str() {
        let json = serde_json::to_value(BillingEventType::TrialReminderSent).unwrap();
        assert_eq!(json, serde_json::json!("trial_reminder_sent"));
        let json = serde_json::to_value(ActorType::Scheduler).unwrap();
        assert_eq!(json, serde_json::json!(ActorType::Scheduler.as_str()));
    }
}
