//! Tenant store
//!
//! The conditional update is the only concurrency control on a tenant
//! record: a write lands only if the stored status still equals the status
//! the caller read.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::plans::{Plan, PlanName};
use crate::tenant::{ServiceStatus, SubscriptionStatus, Tenant, TenantUpdate};

/// Result of a guarded write
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Write committed; carries the record as stored afterwards
    Updated(Tenant),
    /// The stored status no longer matched the expected prior status
    GuardFailed,
    NotFound,
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get(&self, id: Uuid) -> BillingResult<Option<Tenant>>;

    async fn get_by_external_customer_id(&self, customer_id: &str)
        -> BillingResult<Option<Tenant>>;

    /// Apply `update` only if the tenant's status is still `expected`
    async fn conditional_update(
        &self,
        id: Uuid,
        expected: SubscriptionStatus,
        update: &TenantUpdate,
    ) -> BillingResult<UpdateOutcome>;

    /// Trial tenants whose trial ends within `[from, to]`, both inclusive
    async fn list_trials_ending_between(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> BillingResult<Vec<Tenant>>;

    /// Trial tenants whose trial ended strictly before `now`
    async fn list_expired_trials(&self, now: OffsetDateTime) -> BillingResult<Vec<Tenant>>;

    /// Record the hosted assistant's operating mode
    async fn set_service_status(&self, id: Uuid, status: ServiceStatus) -> BillingResult<()>;
}

/// Row shape of the `clients` table
#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: Uuid,
    business_name: String,
    billing_email: String,
    assistant_id: Option<String>,
    subscription_status: String,
    plan_name: Option<String>,
    monthly_call_quota: Option<i32>,
    trial_ends_at: Option<OffsetDateTime>,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    calls_this_month: i64,
    service_status: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = BillingError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        let plan = match row.plan_name.as_deref() {
            Some(name) => {
                let name: PlanName = name.parse()?;
                Some(Plan {
                    name,
                    monthly_call_quota: row
                        .monthly_call_quota
                        .and_then(|q| u32::try_from(q).ok())
                        .unwrap_or_else(|| name.monthly_call_quota()),
                })
            }
            None => None,
        };

        Ok(Tenant {
            id: row.id,
            business_name: row.business_name,
            billing_email: row.billing_email,
            assistant_id: row.assistant_id,
            subscription_status: row.subscription_status.parse()?,
            plan,
            trial_ends_at: row.trial_ends_at,
            external_customer_id: row.stripe_customer_id,
            external_subscription_id: row.stripe_subscription_id,
            calls_this_month: row.calls_this_month,
            service_status: row.service_status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const TENANT_COLUMNS: &str = r#"
    id, business_name, billing_email, assistant_id, subscription_status,
    plan_name, monthly_call_quota, trial_ends_at, stripe_customer_id,
    stripe_subscription_id, calls_this_month, service_status, created_at, updated_at
"#;

/// PostgreSQL-backed tenant store
#[derive(Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Convert sweep candidates, skipping rows that fail to decode so one corrupt
/// record cannot hide every other tenant from the sweep
fn decode_rows(rows: Vec<TenantRow>) -> Vec<Tenant> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match Tenant::try_from(row) {
                Ok(tenant) => Some(tenant),
                Err(e) => {
                    tracing::error!(tenant_id = %id, error = %e, "Skipping unreadable tenant row");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn get(&self, id: Uuid) -> BillingResult<Option<Tenant>> {
        let row: Option<TenantRow> =
            sqlx::query_as(&format!("SELECT {} FROM clients WHERE id = $1", TENANT_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Tenant::try_from).transpose()
    }

    async fn get_by_external_customer_id(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(&format!(
            "SELECT {} FROM clients WHERE stripe_customer_id = $1",
            TENANT_COLUMNS
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Tenant::try_from).transpose()
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        expected: SubscriptionStatus,
        update: &TenantUpdate,
    ) -> BillingResult<UpdateOutcome> {
        let row: Option<TenantRow> = sqlx::query_as(&format!(
            r#"
            UPDATE clients SET
                subscription_status = $3,
                trial_ends_at = CASE WHEN $4 THEN NULL ELSE trial_ends_at END,
                plan_name = COALESCE($5, plan_name),
                monthly_call_quota = COALESCE($6, monthly_call_quota),
                stripe_customer_id = COALESCE($7, stripe_customer_id),
                stripe_subscription_id = COALESCE($8, stripe_subscription_id),
                calls_this_month = CASE WHEN $9 THEN 0 ELSE calls_this_month END,
                updated_at = NOW()
            WHERE id = $1 AND subscription_status = $2
            RETURNING {}
            "#,
            TENANT_COLUMNS
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(update.status.as_str())
        .bind(update.clear_trial_ends_at)
        .bind(update.plan.as_ref().map(|p| p.name.as_str()))
        .bind(update.plan.as_ref().map(|p| p.monthly_call_quota as i32))
        .bind(update.external_customer_id.as_deref())
        .bind(update.external_subscription_id.as_deref())
        .bind(update.reset_usage)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(UpdateOutcome::Updated(Tenant::try_from(row)?));
        }

        // Zero rows: distinguish a lost race from a missing tenant
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM clients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match exists {
            Some(_) => UpdateOutcome::GuardFailed,
            None => UpdateOutcome::NotFound,
        })
    }

    async fn list_trials_ending_between(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> BillingResult<Vec<Tenant>> {
        let rows: Vec<TenantRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM clients
            WHERE subscription_status = 'trial'
              AND trial_ends_at >= $1
              AND trial_ends_at <= $2
            ORDER BY trial_ends_at ASC
            "#,
            TENANT_COLUMNS
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows(rows))
    }

    async fn list_expired_trials(&self, now: OffsetDateTime) -> BillingResult<Vec<Tenant>> {
        let rows: Vec<TenantRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM clients
            WHERE subscription_status = 'trial'
              AND trial_ends_at < $1
            ORDER BY trial_ends_at ASC
            "#,
            TENANT_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows(rows))
    }

    async fn set_service_status(&self, id: Uuid, status: ServiceStatus) -> BillingResult<()> {
        let result = sqlx::query(
            "UPDATE clients SET service_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("Tenant {} not found", id)));
        }
        Ok(())
    }
}
