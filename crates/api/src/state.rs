//! Application state

use std::sync::Arc;
use std::time::Duration;

use voicedesk_billing::BillingService;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    /// Upper bound on acknowledging one webhook delivery
    pub webhook_timeout: Duration,
}

impl AppState {
    pub fn new(mut billing: BillingService, config: &Config) -> Self {
        billing.webhooks = billing.webhooks.with_tolerance(config.webhook_tolerance_secs);

        Self {
            billing: Arc::new(billing),
            webhook_timeout: config.webhook_timeout,
        }
    }
}
