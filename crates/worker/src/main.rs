//! VoiceDesk Background Worker
//!
//! Handles scheduled jobs including:
//! - Trial sweep: reminders and expiries (`SWEEP_CRON`, hourly by default)
//! - Lifecycle invariant checks (daily at 3:30 AM UTC)
//! - Failed notification report for manual resend (daily at 8:00 AM UTC)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use voicedesk_billing::{BillingService, InvariantChecker, TrialSweeper};

const DEFAULT_SWEEP_CRON: &str = "0 0 * * * *";

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

async fn run_sweep(sweeper: &TrialSweeper) {
    let summary = sweeper.run(OffsetDateTime::now_utc()).await;
    if summary.errors > 0 {
        warn!(errors = summary.errors, "Trial sweep finished with errors");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting VoiceDesk Worker");

    let pool = create_db_pool().await?;
    voicedesk_billing::run_migrations(&pool).await?;

    let billing = BillingService::from_env(pool.clone())?;
    let checker = Arc::new(InvariantChecker::new(pool));

    // Catch up on anything that lapsed while the worker was down
    run_sweep(&billing.sweeper).await;

    let scheduler = JobScheduler::new().await?;

    // Job 1: Trial sweep
    let sweep_cron = std::env::var("SWEEP_CRON").unwrap_or_else(|_| DEFAULT_SWEEP_CRON.to_string());
    let sweeper = billing.sweeper.clone();
    scheduler
        .add(Job::new_async(sweep_cron.as_str(), move |_uuid, _l| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                info!("Running scheduled trial sweep");
                run_sweep(&sweeper).await;
            })
        })?)
        .await?;
    info!(cron = %sweep_cron, "Scheduled: Trial sweep");

    // Job 2: Lifecycle invariants (daily at 3:30 AM UTC)
    let invariant_checker = checker.clone();
    scheduler
        .add(Job::new_async("0 30 3 * * *", move |_uuid, _l| {
            let checker = invariant_checker.clone();
            Box::pin(async move {
                info!("Running lifecycle invariant checks");
                match checker.run_all_checks().await {
                    Ok(summary) => {
                        for violation in &summary.violations {
                            warn!(
                                invariant = %violation.invariant,
                                severity = %violation.severity,
                                tenant_ids = ?violation.tenant_ids,
                                "{}",
                                violation.description
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Invariant check failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Lifecycle invariant checks (daily at 3:30 AM UTC)");

    // Job 3: Failed notifications awaiting manual resend (daily at 8:00 AM UTC)
    let notifications = billing.notifications.clone();
    scheduler
        .add(Job::new_async("0 0 8 * * *", move |_uuid, _l| {
            let notifications = notifications.clone();
            Box::pin(async move {
                match notifications.list_failed(100).await {
                    Ok(failed) if failed.is_empty() => {}
                    Ok(failed) => {
                        warn!(count = failed.len(), "Lifecycle emails awaiting manual resend");
                        for record in &failed {
                            warn!(
                                tenant_id = %record.tenant_id,
                                category = record.category.as_str(),
                                recipient = %record.recipient,
                                error = record.error_message.as_deref().unwrap_or(""),
                                "Failed lifecycle email"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to list failed notifications"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Failed notification report (daily at 8:00 AM UTC)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("VoiceDesk Worker started successfully with {} scheduled jobs", 4);

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
