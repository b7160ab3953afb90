// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries processor error text
#![allow(clippy::field_reassign_with_default)] // Used for conditional Stripe params
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! VoiceDesk Billing Module
//!
//! Keeps each tenant's subscription status, service availability and
//! customer notifications consistent with the payment processor.
//!
//! ## Features
//!
//! - **Trial Sweep**: Reminds tenants whose trial ends within a day and
//!   expires trials that ran out without a subscription
//! - **Webhooks**: Verifies and applies Stripe subscription events
//! - **Reconciler**: Single writer of subscription status, driven by a
//!   declarative transition table with conditional writes
//! - **Assistant Toggle**: Suspends or reactivates the tenant's voice assistant
//! - **Email Notifications**: At most one email per tenant, category and transition
//! - **Checkout**: Subscription checkout and customer portal links
//! - **Invariants**: Read-only consistency checks over stored tenants

pub mod assistant;
pub mod checkout;
pub mod client;
pub mod email;
pub mod error;
pub mod events;
pub mod invariants;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod plans;
pub mod reconciler;
pub mod store;
pub mod sweeper;
pub mod tenant;
pub mod transitions;
pub mod webhooks;


// Assistant
pub use assistant::{
    AssistantClient, AssistantConfig, AssistantMode, HttpAssistantClient, ServiceController,
    ToggleOutcome,
};

// Checkout
pub use checkout::{CheckoutResponse, CheckoutService, PortalResponse};

// Client
pub use client::{StripeClient, StripeConfig};

// Email
pub use email::{
    DispatchOutcome, EmailCategory, EmailConfig, EmailSender, NotificationDispatcher,
    NotificationLog, NotificationRecord, PgNotificationLog, ResendEmailSender,
};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{
    ActorType, AuditLog, BillingEventBuilder, BillingEventLogger, BillingEventType,
    TransitionRecord,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Plans
pub use plans::{Plan, PlanName, PriceIds};

// Reconciler
pub use reconciler::{
    ReconcileOutcome, SideEffectPlan, SideEffectReport, StateReconciler, TenantRef,
    TransitionRequest,
};

// Store
pub use store::{PgTenantStore, TenantStore, UpdateOutcome};

// Sweeper
pub use sweeper::{SweepSummary, TrialSweeper};

// Tenant
pub use tenant::{ServiceStatus, SubscriptionStatus, Tenant, TenantUpdate};

// Transitions
pub use transitions::{EventKind, TransitionTable};

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome, DEFAULT_TOLERANCE_SECS};

use std::sync::Arc;

use sqlx::PgPool;

/// Storage and delivery backends the billing service runs on
pub struct BillingBackends {
    pub store: Arc<dyn TenantStore>,
    pub audit: Arc<dyn AuditLog>,
    pub notifications: Arc<dyn NotificationLog>,
    pub email: Arc<dyn EmailSender>,
    pub assistant: Arc<dyn AssistantClient>,
}

impl BillingBackends {
    /// PostgreSQL storage with Resend email and the HTTP assistant API
    pub fn from_env(pool: PgPool) -> Self {
        Self {
            store: Arc::new(PgTenantStore::new(pool.clone())),
            audit: Arc::new(BillingEventLogger::new(pool.clone())),
            notifications: Arc::new(PgNotificationLog::new(pool)),
            email: Arc::new(ResendEmailSender::new(EmailConfig::from_env())),
            assistant: Arc::new(HttpAssistantClient::new(AssistantConfig::from_env())),
        }
    }
}

/// Main billing service that combines all lifecycle functionality
#[derive(Clone)]
pub struct BillingService {
    pub store: Arc<dyn TenantStore>,
    pub audit: Arc<dyn AuditLog>,
    pub notifications: NotificationDispatcher,
    pub reconciler: StateReconciler,
    pub sweeper: TrialSweeper,
    pub webhooks: WebhookHandler,
    pub checkout: CheckoutService,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Self::new(StripeConfig::from_env()?, BillingBackends::from_env(pool))
    }

    /// Create a new billing service with explicit config and backends
    pub fn new(config: StripeConfig, backends: BillingBackends) -> BillingResult<Self> {
        let table = Arc::new(TransitionTable::standard()?);
        let notifications =
            NotificationDispatcher::new(backends.email, backends.notifications.clone());
        let controller = ServiceController::new(backends.assistant, backends.store.clone());
        let reconciler = StateReconciler::new(
            backends.store.clone(),
            backends.audit.clone(),
            table,
            notifications.clone(),
            controller,
        );

        let webhooks = WebhookHandler::new(
            reconciler.clone(),
            config.prices.clone(),
            config.webhook_secret.clone(),
        );

        Ok(Self {
            store: backends.store,
            audit: backends.audit,
            notifications,
            sweeper: TrialSweeper::new(reconciler.clone()),
            reconciler,
            webhooks,
            checkout: CheckoutService::new(StripeClient::new(config)),
        })
    }
}

/// Apply the bundled schema migrations
pub async fn run_migrations(pool: &PgPool) -> BillingResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| BillingError::Database(format!("Migration failed: {}", e)))?;
    tracing::info!("Billing migrations applied");
    Ok(())
}
