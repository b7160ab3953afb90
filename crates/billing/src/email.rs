//! Lifecycle email notifications
//!
//! Each side-effect category maps to one template. Sends are fire-and-forget
//! with respect to the status transition: a failed send is recorded in the
//! notification log with `failed` status and never retried automatically.
//!
//! Before anything is sent a notification record is claimed under the key
//! `(tenant, category, transition_key)`. A redelivered event finds the claim
//! and skips the send.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::plans::PlanName;
use crate::tenant::Tenant;

/// Lifecycle email categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailCategory {
    TrialReminder,
    TrialExpired,
    PaymentReceipt,
    PaymentFailed,
    SubscriptionCancelled,
    PaymentConfirmation,
}

impl EmailCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailCategory::TrialReminder => "trial_reminder",
            EmailCategory::TrialExpired => "trial_expired",
            EmailCategory::PaymentReceipt => "payment_receipt",
            EmailCategory::PaymentFailed => "payment_failed",
            EmailCategory::SubscriptionCancelled => "subscription_cancelled",
            EmailCategory::PaymentConfirmation => "payment_confirmation",
        }
    }
}

impl std::str::FromStr for EmailCategory {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial_reminder" => Ok(EmailCategory::TrialReminder),
            "trial_expired" => Ok(EmailCategory::TrialExpired),
            "payment_receipt" => Ok(EmailCategory::PaymentReceipt),
            "payment_failed" => Ok(EmailCategory::PaymentFailed),
            "subscription_cancelled" => Ok(EmailCategory::SubscriptionCancelled),
            "payment_confirmation" => Ok(EmailCategory::PaymentConfirmation),
            other => Err(BillingError::Internal(format!(
                "Unknown email category: {}",
                other
            ))),
        }
    }
}

/// Trial reminder variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderBucket {
    TwoDays,
    OneDay,
    Other(i64),
}

impl ReminderBucket {
    pub fn from_days_left(days_left: i64) -> Self {
        match days_left {
            2 => ReminderBucket::TwoDays,
            1 => ReminderBucket::OneDay,
            other => ReminderBucket::Other(other),
        }
    }
}

/// Values a template may interpolate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateContext {
    pub business_name: String,
    pub days_left: Option<i64>,
    pub plan: Option<PlanName>,
    pub amount_cents: Option<i64>,
    pub invoice_url: Option<String>,
}

impl TemplateContext {
    pub fn for_tenant(tenant: &Tenant) -> Self {
        Self {
            business_name: tenant.business_name.clone(),
            plan: tenant.plan.as_ref().map(|p| p.name),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

fn format_amount(cents: Option<i64>) -> Option<String> {
    cents.map(|c| format!("${}.{:02}", c / 100, c % 100))
}

fn format_count(n: u32) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Render the template for `category`
pub fn render(category: EmailCategory, ctx: &TemplateContext) -> RenderedEmail {
    let name = &ctx.business_name;

    match category {
        EmailCategory::TrialReminder => {
            let bucket = ReminderBucket::from_days_left(ctx.days_left.unwrap_or(0));
            let (subject, lead) = match bucket {
                ReminderBucket::TwoDays => (
                    "Your VoiceDesk trial ends in 2 days".to_string(),
                    "Your free trial ends in 2 days.".to_string(),
                ),
                ReminderBucket::OneDay => (
                    "Last day of your VoiceDesk trial".to_string(),
                    "Your free trial ends within the next 24 hours.".to_string(),
                ),
                ReminderBucket::Other(days) if days > 2 => (
                    format!("Your VoiceDesk trial ends in {} days", days),
                    format!("Your free trial ends in {} days.", days),
                ),
                ReminderBucket::Other(_) => (
                    "Your VoiceDesk trial is ending".to_string(),
                    "Your free trial is about to end.".to_string(),
                ),
            };
            RenderedEmail {
                subject,
                body: format!(
                    "Hi {},\n\n{} Choose a plan now so your assistant keeps answering \
                     calls without interruption.\n\nThe VoiceDesk team",
                    name, lead
                ),
            }
        }
        EmailCategory::TrialExpired => RenderedEmail {
            subject: "Your VoiceDesk trial has ended".to_string(),
            body: format!(
                "Hi {},\n\nYour free trial has ended and your assistant has stopped \
                 answering calls. Subscribe to any plan to switch it back on right away; \
                 your settings and call history are kept.\n\nThe VoiceDesk team",
                name
            ),
        },
        EmailCategory::PaymentReceipt => {
            let amount = format_amount(ctx.amount_cents)
                .map(|a| format!(" of {}", a))
                .unwrap_or_default();
            RenderedEmail {
                subject: "VoiceDesk payment received".to_string(),
                body: format!(
                    "Hi {},\n\nWe received your payment{}. Your monthly call allowance \
                     has been reset.{}\n\nThe VoiceDesk team",
                    name,
                    amount,
                    ctx.invoice_url
                        .as_deref()
                        .map(|url| format!("\n\nInvoice: {}", url))
                        .unwrap_or_default()
                ),
            }
        }
        EmailCategory::PaymentFailed => {
            let amount = format_amount(ctx.amount_cents)
                .map(|a| format!(" for {}", a))
                .unwrap_or_default();
            RenderedEmail {
                subject: "Action required: your VoiceDesk payment failed".to_string(),
                body: format!(
                    "Hi {},\n\nURGENT: we could not process your payment{}. Please update \
                     your payment method to avoid any interruption to your assistant.{}\n\n\
                     The VoiceDesk team",
                    name,
                    amount,
                    ctx.invoice_url
                        .as_deref()
                        .map(|url| format!("\n\nPay now: {}", url))
                        .unwrap_or_default()
                ),
            }
        }
        EmailCategory::SubscriptionCancelled => RenderedEmail {
            subject: "Your VoiceDesk subscription has been cancelled".to_string(),
            body: format!(
                "Hi {},\n\nYour subscription has been cancelled. Your account and call \
                 history are kept, and you can resubscribe at any time.\n\nThe VoiceDesk team",
                name
            ),
        },
        EmailCategory::PaymentConfirmation => {
            let detail = match ctx.plan {
                Some(plan) => {
                    let perk = match plan {
                        PlanName::Starter => "a great fit for getting started",
                        PlanName::Professional => "plus priority support",
                        PlanName::Business => "and a dedicated success manager",
                    };
                    format!(
                        "Your {} plan includes {} calls a month, {}.",
                        plan.display_name(),
                        format_count(plan.monthly_call_quota()),
                        perk
                    )
                }
                None => "Your subscription is now active.".to_string(),
            };
            let plan_label = ctx.plan.map(|p| p.display_name()).unwrap_or("VoiceDesk");
            RenderedEmail {
                subject: format!("Welcome to the VoiceDesk {} plan", plan_label),
                body: format!(
                    "Hi {},\n\nThanks for subscribing! {} Your assistant is live and \
                     answering calls.\n\nThe VoiceDesk team",
                    name, detail
                ),
            }
        }
    }
}

/// Outbound email transport
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send one email; returns the provider's delivery id
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> BillingResult<String>;
}

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: String,
    pub from_address: String,
    pub api_base_url: String,
}

impl EmailConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "VoiceDesk <billing@voicedesk.app>".to_string()),
            api_base_url: std::env::var("RESEND_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

/// Email delivery through the Resend HTTP API
#[derive(Clone)]
pub struct ResendEmailSender {
    http: reqwest::Client,
    config: EmailConfig,
}

impl ResendEmailSender {
    pub fn new(config: EmailConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { http, config }
    }
}

#[async_trait]
impl EmailSender for ResendEmailSender {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> BillingResult<String> {
        if self.config.api_key.is_empty() {
            return Err(BillingError::Config("RESEND_API_KEY is not set".to_string()));
        }

        let response = self
            .http
            .post(format!("{}/emails", self.config.api_base_url))
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "from": self.config.from_address,
                "to": [recipient],
                "subject": subject,
                "text": body,
            }))
            .send()
            .await
            .map_err(|e| BillingError::external("resend", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BillingError::external(
                "resend",
                format!("HTTP {}: {}", status, text),
            ));
        }

        let parsed: ResendResponse = response
            .json()
            .await
            .map_err(|e| BillingError::external("resend", e.to_string()))?;
        Ok(parsed.id)
    }
}

/// Delivery state of a notification record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(BillingError::Internal(format!(
                "Unknown delivery status: {}",
                other
            ))),
        }
    }
}

/// Log entry for one notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub category: EmailCategory,
    pub recipient: String,
    pub transition_key: String,
    pub sent_at: OffsetDateTime,
    pub status: DeliveryStatus,
    pub external_delivery_id: Option<String>,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait NotificationLog: Send + Sync {
    /// Insert a pending record. Returns `false` if a record for the same
    /// `(tenant, category, transition_key)` already exists.
    async fn claim(&self, record: &NotificationRecord) -> BillingResult<bool>;

    /// Settle a pending record
    async fn complete(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        external_delivery_id: Option<&str>,
        error_message: Option<&str>,
    ) -> BillingResult<()>;

    /// Failed sends awaiting manual resend, oldest first
    async fn list_failed(&self, limit: i64) -> BillingResult<Vec<NotificationRecord>>;
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    client_id: Uuid,
    category: String,
    recipient: String,
    transition_key: String,
    sent_at: OffsetDateTime,
    status: String,
    external_delivery_id: Option<String>,
    error_message: Option<String>,
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = BillingError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(NotificationRecord {
            id: row.id,
            tenant_id: row.client_id,
            category: row.category.parse()?,
            recipient: row.recipient,
            transition_key: row.transition_key,
            sent_at: row.sent_at,
            status: row.status.parse()?,
            external_delivery_id: row.external_delivery_id,
            error_message: row.error_message,
        })
    }
}

/// PostgreSQL-backed notification log
#[derive(Clone)]
pub struct PgNotificationLog {
    pool: PgPool,
}

impl PgNotificationLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLog for PgNotificationLog {
    async fn claim(&self, record: &NotificationRecord) -> BillingResult<bool> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO notification_log
                (id, client_id, category, recipient, transition_key, sent_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            ON CONFLICT (client_id, category, transition_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(record.tenant_id)
        .bind(record.category.as_str())
        .bind(&record.recipient)
        .bind(&record.transition_key)
        .bind(record.sent_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn complete(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        external_delivery_id: Option<&str>,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE notification_log
            SET status = $2, external_delivery_id = $3, error_message = $4, sent_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(external_delivery_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_failed(&self, limit: i64) -> BillingResult<Vec<NotificationRecord>> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            r#"
            SELECT id, client_id, category, recipient, transition_key, sent_at,
                   status, external_delivery_id, error_message
            FROM notification_log
            WHERE status = 'failed'
            ORDER BY sent_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NotificationRecord::try_from).collect()
    }
}

/// What happened to one dispatch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { delivery_id: String },
    /// Already claimed by an earlier delivery of the same transition
    Skipped,
    Failed { error: String },
}

/// Sends lifecycle emails, at most once per transition
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: Arc<dyn EmailSender>,
    log: Arc<dyn NotificationLog>,
}

impl NotificationDispatcher {
    pub fn new(sender: Arc<dyn EmailSender>, log: Arc<dyn NotificationLog>) -> Self {
        Self { sender, log }
    }

    pub async fn dispatch(
        &self,
        tenant: &Tenant,
        category: EmailCategory,
        ctx: &TemplateContext,
        transition_key: &str,
    ) -> DispatchOutcome {
        let record = NotificationRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            category,
            recipient: tenant.billing_email.clone(),
            transition_key: transition_key.to_string(),
            sent_at: OffsetDateTime::now_utc(),
            status: DeliveryStatus::Pending,
            external_delivery_id: None,
            error_message: None,
        };

        match self.log.claim(&record).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    tenant_id = %tenant.id,
                    category = category.as_str(),
                    transition_key = %transition_key,
                    "Notification already claimed for this transition - skipping"
                );
                return DispatchOutcome::Skipped;
            }
            Err(e) => {
                // Without a claim the send could repeat on redelivery
                tracing::error!(
                    tenant_id = %tenant.id,
                    category = category.as_str(),
                    error = %e,
                    "Failed to claim notification record - email not sent"
                );
                return DispatchOutcome::Failed {
                    error: e.to_string(),
                };
            }
        }

        let email = render(category, ctx);
        let result = self
            .sender
            .send(&record.recipient, &email.subject, &email.body)
            .await;

        let (outcome, status, delivery_id, error) = match result {
            Ok(delivery_id) => {
                tracing::info!(
                    tenant_id = %tenant.id,
                    category = category.as_str(),
                    delivery_id = %delivery_id,
                    "Lifecycle email sent"
                );
                (
                    DispatchOutcome::Sent {
                        delivery_id: delivery_id.clone(),
                    },
                    DeliveryStatus::Sent,
                    Some(delivery_id),
                    None,
                )
            }
            Err(e) => {
                tracing::error!(
                    tenant_id = %tenant.id,
                    category = category.as_str(),
                    error = %e,
                    "Failed to send lifecycle email - manual resend required"
                );
                (
                    DispatchOutcome::Failed {
                        error: e.to_string(),
                    },
                    DeliveryStatus::Failed,
                    None,
                    Some(e.to_string()),
                )
            }
        };

        if let Err(e) = self
            .log
            .complete(record.id, status, delivery_id.as_deref(), error.as_deref())
            .await
        {
            tracing::warn!(
                notification_id = %record.id,
                error = %e,
                "Failed to settle notification record"
            );
        }

        outcome
    }

    /// Failed sends awaiting manual resend
    pub async fn list_failed(&self, limit: i64) -> BillingResult<Vec<NotificationRecord>> {
        self.log.list_failed(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryNotificationLog, RecordingEmailSender};
    use time::Duration;

    fn ctx_with_days(days: i64) -> TemplateContext {
        TemplateContext {
            business_name: "Bright Dental".to_string(),
            days_left: Some(days),
            ..Default::default()
        }
    }

    #[test]
    fn test_reminder_buckets() {
        assert_eq!(ReminderBucket::from_days_left(2), ReminderBucket::TwoDays);
        assert_eq!(ReminderBucket::from_days_left(1), ReminderBucket::OneDay);
        assert_eq!(ReminderBucket::from_days_left(0), ReminderBucket::Other(0));
        assert_eq!(ReminderBucket::from_days_left(3), ReminderBucket::Other(3));
    }

    #[test]
    fn test_reminder_variants_differ_by_bucket() {
        let two = render(EmailCategory::TrialReminder, &ctx_with_days(2));
        let one = render(EmailCategory::TrialReminder, &ctx_with_days(1));
        let three = render(EmailCategory::TrialReminder, &ctx_with_days(3));

        assert!(two.subject.contains("2 days"));
        assert!(one.subject.contains("Last day"));
        assert!(three.subject.contains("3 days"));
        assert!(one.body.starts_with("Hi Bright Dental"));
    }

    #[test]
    fn test_payment_failed_is_urgent_and_formats_amount() {
        let ctx = TemplateContext {
            business_name: "Bright Dental".to_string(),
            amount_cents: Some(4_905),
            invoice_url: Some("https://pay.example/inv_1".to_string()),
            ..Default::default()
        };
        let email = render(EmailCategory::PaymentFailed, &ctx);
        assert!(email.subject.starts_with("Action required"));
        assert!(email.body.contains("URGENT"));
        assert!(email.body.contains("$49.05"));
        assert!(email.body.contains("https://pay.example/inv_1"));
    }

    #[test]
    fn test_confirmation_varies_by_plan() {
        let mut ctx = TemplateContext {
            business_name: "Bright Dental".to_string(),
            plan: Some(PlanName::Starter),
            ..Default::default()
        };
        let starter = render(EmailCategory::PaymentConfirmation, &ctx);
        ctx.plan = Some(PlanName::Business);
        let business = render(EmailCategory::PaymentConfirmation, &ctx);

        assert!(starter.subject.contains("Starter"));
        assert!(business.subject.contains("Business"));
        assert_ne!(starter.body, business.body);
        assert!(starter.body.contains("200 calls a month"));
        assert!(business.body.contains("2,000 calls a month"));
    }

    #[test]
    fn test_confirmation_quota_follows_plan() {
        for plan in [PlanName::Starter, PlanName::Professional, PlanName::Business] {
            let ctx = TemplateContext {
                business_name: "Bright Dental".to_string(),
                plan: Some(plan),
                ..Default::default()
            };
            let email = render(EmailCategory::PaymentConfirmation, &ctx);
            let quota = format_count(plan.monthly_call_quota());
            assert!(email.body.contains(&format!("{} calls a month", quota)), "{}", email.body);
        }
        assert_eq!(format_count(750), "750");
        assert_eq!(format_count(12_500), "12,500");
    }

    fn tenant() -> Tenant {
        Tenant::new_trial(
            "Bright Dental",
            "front@bright.test",
            OffsetDateTime::now_utc() + Duration::days(1),
        )
    }

    #[tokio::test]
    async fn test_dispatch_sends_once_per_transition_key() {
        let sender = Arc::new(RecordingEmailSender::default());
        let log = Arc::new(InMemoryNotificationLog::default());
        let dispatcher = NotificationDispatcher::new(sender.clone(), log.clone());
        let tenant = tenant();
        let ctx = TemplateContext::for_tenant(&tenant);

        let first = dispatcher
            .dispatch(&tenant, EmailCategory::TrialExpired, &ctx, "evt_1")
            .await;
        let second = dispatcher
            .dispatch(&tenant, EmailCategory::TrialExpired, &ctx, "evt_1")
            .await;

        assert!(matches!(first, DispatchOutcome::Sent { .. }));
        assert_eq!(second, DispatchOutcome::Skipped);
        assert_eq!(sender.sent().await.len(), 1);

        let records = log.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, DeliveryStatus::Sent);
        assert_eq!(records[0].recipient, "front@bright.test");
    }

    #[tokio::test]
    async fn test_failed_send_is_logged_not_retried() {
        let sender = Arc::new(RecordingEmailSender::failing());
        let log = Arc::new(InMemoryNotificationLog::default());
        let dispatcher = NotificationDispatcher::new(sender.clone(), log.clone());
        let tenant = tenant();
        let ctx = TemplateContext::for_tenant(&tenant);

        let outcome = dispatcher
            .dispatch(&tenant, EmailCategory::PaymentFailed, &ctx, "evt_2")
            .await;
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));

        // A redelivery does not retry a failed send
        let again = dispatcher
            .dispatch(&tenant, EmailCategory::PaymentFailed, &ctx, "evt_2")
            .await;
        assert_eq!(again, DispatchOutcome::Skipped);

        let failed = dispatcher.list_failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].category, EmailCategory::PaymentFailed);
        assert!(failed[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_resend_sender_posts_email() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_header("authorization", "Bearer re_test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"email_123"}"#)
            .create_async()
            .await;

        let sender = ResendEmailSender::new(EmailConfig {
            api_key: "re_test".to_string(),
            from_address: "billing@voicedesk.test".to_string(),
            api_base_url: server.url(),
        });

        let id = sender
            .send("owner@shop.test", "Subject", "Body")
            .await
            .unwrap();
        assert_eq!(id, "email_123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resend_sender_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/emails")
            .with_status(422)
            .with_body(r#"{"message":"invalid recipient"}"#)
            .create_async()
            .await;

        let sender = ResendEmailSender::new(EmailConfig {
            api_key: "re_test".to_string(),
            from_address: "billing@voicedesk.test".to_string(),
            api_base_url: server.url(),
        });

        let err = sender.send("bad", "Subject", "Body").await.unwrap_err();
        assert!(matches!(err, BillingError::ExternalService { service: "resend", .. }));
    }
}
