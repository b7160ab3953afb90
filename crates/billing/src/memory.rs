//! In-memory implementations of the storage and delivery traits
//!
//! Compiled for tests and behind the `test-util` feature. The tenant store
//! emulates the conditional update with a single write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::assistant::{AssistantClient, AssistantMode};
use crate::email::{DeliveryStatus, EmailSender, NotificationLog, NotificationRecord};
use crate::error::{BillingError, BillingResult};
use crate::events::{AuditLog, TransitionRecord};
use crate::store::{TenantStore, UpdateOutcome};
use crate::tenant::{ServiceStatus, SubscriptionStatus, Tenant, TenantUpdate};

#[derive(Default)]
pub struct InMemoryTenantStore {
    tenants: RwLock<HashMap<Uuid, Tenant>>,
    fail_writes: AtomicBool,
    interference: Mutex<Option<(Uuid, TenantUpdate)>>,
}

impl InMemoryTenantStore {
    pub async fn insert(&self, tenant: Tenant) {
        self.tenants.write().await.insert(tenant.id, tenant);
    }

    /// Make every subsequent conditional update fail with a database error
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Apply `update` to `id` just before the next conditional update
    /// compares statuses, as a concurrent writer would
    pub async fn interfere_with_next_update(&self, id: Uuid, update: TenantUpdate) {
        *self.interference.lock().await = Some((id, update));
    }

    pub async fn all(&self) -> Vec<Tenant> {
        self.tenants.read().await.values().cloned().collect()
    }

    async fn trials_matching(&self, keep: impl Fn(OffsetDateTime) -> bool) -> Vec<Tenant> {
        let mut matched: Vec<Tenant> = self
            .tenants
            .read()
            .await
            .values()
            .filter(|t| t.subscription_status == SubscriptionStatus::Trial)
            .filter(|t| t.trial_ends_at.is_some_and(&keep))
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.trial_ends_at);
        matched
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get(&self, id: Uuid) -> BillingResult<Option<Tenant>> {
        Ok(self.tenants.read().await.get(&id).cloned())
    }

    async fn get_by_external_customer_id(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<Tenant>> {
        Ok(self
            .tenants
            .read()
            .await
            .values()
            .find(|t| t.external_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        expected: SubscriptionStatus,
        update: &TenantUpdate,
    ) -> BillingResult<UpdateOutcome> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BillingError::Database("connection pool timed out".to_string()));
        }

        let mut tenants = self.tenants.write().await;
        let now = OffsetDateTime::now_utc();

        if let Some((target, concurrent)) = self.interference.lock().await.take() {
            if let Some(tenant) = tenants.get_mut(&target) {
                tenant.apply(&concurrent, now);
            }
        }

        let Some(tenant) = tenants.get_mut(&id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if tenant.subscription_status != expected {
            return Ok(UpdateOutcome::GuardFailed);
        }

        tenant.apply(update, now);
        Ok(UpdateOutcome::Updated(tenant.clone()))
    }

    async fn list_trials_ending_between(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> BillingResult<Vec<Tenant>> {
        Ok(self.trials_matching(|ends| ends >= from && ends <= to).await)
    }

    async fn list_expired_trials(&self, now: OffsetDateTime) -> BillingResult<Vec<Tenant>> {
        Ok(self.trials_matching(|ends| ends < now).await)
    }

    async fn set_service_status(&self, id: Uuid, status: ServiceStatus) -> BillingResult<()> {
        let mut tenants = self.tenants.write().await;
        let tenant = tenants
            .get_mut(&id)
            .ok_or_else(|| BillingError::NotFound(format!("Tenant {} not found", id)))?;
        tenant.service_status = status;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<TransitionRecord>>,
    append_delay: Option<std::time::Duration>,
}

impl InMemoryAuditLog {
    /// An audit log whose every append waits `delay` before writing
    pub fn with_append_delay(delay: std::time::Duration) -> Self {
        Self {
            records: RwLock::default(),
            append_delay: Some(delay),
        }
    }

    pub async fn records(&self) -> Vec<TransitionRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn contains(&self, tenant_id: Uuid, key: &str) -> BillingResult<bool> {
        Ok(self.records.read().await.iter().any(|r| {
            r.tenant_id == tenant_id
                && (r.external_event_id.as_deref() == Some(key)
                    || r.dedupe_key.as_deref() == Some(key))
        }))
    }

    async fn append(&self, record: &TransitionRecord) -> BillingResult<bool> {
        if let Some(delay) = self.append_delay {
            tokio::time::sleep(delay).await;
        }
        let mut records = self.records.write().await;
        let duplicate = records.iter().any(|r| {
            r.tenant_id == record.tenant_id
                && ((record.external_event_id.is_some()
                    && r.external_event_id == record.external_event_id)
                    || (record.dedupe_key.is_some() && r.dedupe_key == record.dedupe_key))
        });
        if duplicate {
            return Ok(false);
        }
        records.push(record.clone());
        Ok(true)
    }

    async fn list_for_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<TransitionRecord>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .records
            .read()
            .await
            .iter()
            .rev()
            .filter(|r| r.tenant_id == tenant_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryNotificationLog {
    records: RwLock<Vec<NotificationRecord>>,
}

impl InMemoryNotificationLog {
    pub async fn records(&self) -> Vec<NotificationRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl NotificationLog for InMemoryNotificationLog {
    async fn claim(&self, record: &NotificationRecord) -> BillingResult<bool> {
        let mut records = self.records.write().await;
        let exists = records.iter().any(|r| {
            r.tenant_id == record.tenant_id
                && r.category == record.category
                && r.transition_key == record.transition_key
        });
        if exists {
            return Ok(false);
        }
        records.push(record.clone());
        Ok(true)
    }

    async fn complete(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        external_delivery_id: Option<&str>,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.id == id && r.status == DeliveryStatus::Pending)
        {
            record.status = status;
            record.external_delivery_id = external_delivery_id.map(str::to_string);
            record.error_message = error_message.map(str::to_string);
            record.sent_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn list_failed(&self, limit: i64) -> BillingResult<Vec<NotificationRecord>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.status == DeliveryStatus::Failed)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// An email as handed to the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Email sender that records instead of delivering
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<SentEmail>>,
    fail: bool,
}

impl RecordingEmailSender {
    /// A sender whose every send fails
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> BillingResult<String> {
        if self.fail {
            return Err(BillingError::external("email", "delivery refused"));
        }
        let mut sent = self.sent.lock().await;
        sent.push(SentEmail {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(format!("mem_{}", sent.len()))
    }
}

/// Assistant client that records mode changes
#[derive(Default)]
pub struct RecordingAssistantClient {
    calls: Mutex<Vec<(String, AssistantMode)>>,
    fail: bool,
}

impl RecordingAssistantClient {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::default(),
            fail: true,
        }
    }

    pub async fn calls(&self) -> Vec<(String, AssistantMode)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl AssistantClient for RecordingAssistantClient {
    async fn set_mode(
        &self,
        assistant_id: &str,
        mode: AssistantMode,
        _prompt: &str,
    ) -> BillingResult<()> {
        if self.fail {
            return Err(BillingError::external("assistant", "unreachable"));
        }
        self.calls.lock().await.push((assistant_id.to_string(), mode));
        Ok(())
    }
}
