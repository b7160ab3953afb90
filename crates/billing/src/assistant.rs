//! Hosted assistant service controller
//!
//! Switches a tenant's hosted assistant between full service and a minimal
//! suspended prompt. Calls are best-effort: failures are logged and never
//! revert the subscription status that triggered them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::error::{BillingError, BillingResult};
use crate::store::TenantStore;
use crate::tenant::{ServiceStatus, Tenant};

/// Operating mode of a hosted assistant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantMode {
    FullService,
    Suspended,
}

impl AssistantMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssistantMode::FullService => "full_service",
            AssistantMode::Suspended => "suspended",
        }
    }

    pub fn service_status(&self) -> ServiceStatus {
        match self {
            AssistantMode::FullService => ServiceStatus::Active,
            AssistantMode::Suspended => ServiceStatus::Suspended,
        }
    }
}

/// System prompt for a mode
pub fn prompt_for(mode: AssistantMode, business_name: &str) -> String {
    match mode {
        AssistantMode::FullService => format!(
            "You are the friendly receptionist for {}. Answer the caller's questions, \
             capture their name, number and reason for calling, and book appointments \
             when asked.",
            business_name
        ),
        AssistantMode::Suspended => format!(
            "You are the answering service for {}. The receptionist is unavailable right \
             now. Politely take the caller's name and number and let them know someone \
             will call back.",
            business_name
        ),
    }
}

#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn set_mode(
        &self,
        assistant_id: &str,
        mode: AssistantMode,
        prompt: &str,
    ) -> BillingResult<()>;
}

/// Hosted assistant API configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub api_url: String,
    pub api_key: String,
    /// Retries after the first attempt
    pub max_retries: usize,
    pub retry_base_ms: u64,
}

impl AssistantConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("ASSISTANT_API_URL")
                .unwrap_or_else(|_| "https://api.vapi.ai".to_string()),
            api_key: std::env::var("ASSISTANT_API_KEY").unwrap_or_default(),
            max_retries: 2,
            retry_base_ms: 50,
        }
    }
}

struct AttemptError {
    retryable: bool,
    error: BillingError,
}

/// Assistant client over the hosted assistant's HTTP API
#[derive(Clone)]
pub struct HttpAssistantClient {
    http: reqwest::Client,
    config: AssistantConfig,
}

impl HttpAssistantClient {
    pub fn new(config: AssistantConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    async fn patch_once(
        &self,
        assistant_id: &str,
        mode: AssistantMode,
        prompt: &str,
    ) -> Result<(), AttemptError> {
        let response = self
            .http
            .patch(format!("{}/assistant/{}", self.config.api_url, assistant_id))
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "metadata": { "mode": mode.as_str() },
                "model": {
                    "messages": [{ "role": "system", "content": prompt }]
                }
            }))
            .send()
            .await
            .map_err(|e| AttemptError {
                retryable: true,
                error: BillingError::external("assistant", e.to_string()),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(AttemptError {
            retryable: status.is_server_error() || status.as_u16() == 429,
            error: BillingError::external("assistant", format!("HTTP {}: {}", status, body)),
        })
    }
}

#[async_trait]
impl AssistantClient for HttpAssistantClient {
    async fn set_mode(
        &self,
        assistant_id: &str,
        mode: AssistantMode,
        prompt: &str,
    ) -> BillingResult<()> {
        let strategy = ExponentialBackoff::from_millis(self.config.retry_base_ms)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.config.max_retries);

        RetryIf::start(
            strategy,
            || self.patch_once(assistant_id, mode, prompt),
            |e: &AttemptError| e.retryable,
        )
        .await
        .map_err(|e| e.error)
    }
}

/// Result of a best-effort toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Applied,
    /// Tenant has no provisioned assistant
    Skipped,
    Failed(String),
}

/// Suspends and reactivates tenants' hosted assistants
#[derive(Clone)]
pub struct ServiceController {
    client: Arc<dyn AssistantClient>,
    store: Arc<dyn TenantStore>,
}

impl ServiceController {
    pub fn new(client: Arc<dyn AssistantClient>, store: Arc<dyn TenantStore>) -> Self {
        Self { client, store }
    }

    pub async fn suspend(&self, tenant: &Tenant) -> ToggleOutcome {
        self.toggle(tenant, AssistantMode::Suspended).await
    }

    pub async fn reactivate(&self, tenant: &Tenant) -> ToggleOutcome {
        self.toggle(tenant, AssistantMode::FullService).await
    }

    async fn toggle(&self, tenant: &Tenant, mode: AssistantMode) -> ToggleOutcome {
        let Some(assistant_id) = tenant.assistant_id.as_deref() else {
            tracing::info!(
                tenant_id = %tenant.id,
                mode = mode.as_str(),
                "Tenant has no assistant provisioned - skipping mode change"
            );
            return ToggleOutcome::Skipped;
        };

        let prompt = prompt_for(mode, &tenant.business_name);
        if let Err(e) = self.client.set_mode(assistant_id, mode, &prompt).await {
            tracing::error!(
                tenant_id = %tenant.id,
                assistant_id = %assistant_id,
                mode = mode.as_str(),
                error = %e,
                "Failed to change assistant mode"
            );
            return ToggleOutcome::Failed(e.to_string());
        }

        if let Err(e) = self.store.set_service_status(tenant.id, mode.service_status()).await {
            tracing::warn!(
                tenant_id = %tenant.id,
                error = %e,
                "Assistant mode changed but service status was not recorded"
            );
        }

        tracing::info!(
            tenant_id = %tenant.id,
            mode = mode.as_str(),
            "Assistant mode changed"
        );
        ToggleOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryTenantStore, RecordingAssistantClient};
    use time::{Duration as TimeDuration, OffsetDateTime};

    fn config(url: String) -> AssistantConfig {
        AssistantConfig {
            api_url: url,
            api_key: "asst_key".to_string(),
            max_retries: 2,
            retry_base_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_http_client_patches_assistant() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/assistant/asst_1")
            .match_header("authorization", "Bearer asst_key")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "metadata": { "mode": "suspended" }
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = HttpAssistantClient::new(config(server.url()));
        client
            .set_mode("asst_1", AssistantMode::Suspended, "prompt")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_client_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/assistant/asst_1")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = HttpAssistantClient::new(config(server.url()));
        let err = client
            .set_mode("asst_1", AssistantMode::FullService, "prompt")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ExternalService { service: "assistant", .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_client_does_not_retry_client_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/assistant/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let client = HttpAssistantClient::new(config(server.url()));
        assert!(client
            .set_mode("missing", AssistantMode::Suspended, "prompt")
            .await
            .is_err());
        mock.assert_async().await;
    }

    fn tenant_with_assistant() -> Tenant {
        let mut tenant = Tenant::new_trial(
            "Corner Bakery",
            "owner@bakery.test",
            OffsetDateTime::now_utc() + TimeDuration::days(2),
        );
        tenant.assistant_id = Some("asst_bakery".to_string());
        tenant
    }

    #[tokio::test]
    async fn test_suspend_records_service_status() {
        let tenant = tenant_with_assistant();
        let store = Arc::new(InMemoryTenantStore::default());
        store.insert(tenant.clone()).await;
        let client = Arc::new(RecordingAssistantClient::default());
        let controller = ServiceController::new(client.clone(), store.clone());

        assert_eq!(controller.suspend(&tenant).await, ToggleOutcome::Applied);

        let calls = client.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "asst_bakery");
        assert_eq!(calls[0].1, AssistantMode::Suspended);

        let stored = store.get(tenant.id).await.unwrap().unwrap();
        assert_eq!(stored.service_status, ServiceStatus::Suspended);
    }

    #[tokio::test]
    async fn test_failure_leaves_service_status_untouched() {
        let tenant = tenant_with_assistant();
        let store = Arc::new(InMemoryTenantStore::default());
        store.insert(tenant.clone()).await;
        let controller =
            ServiceController::new(Arc::new(RecordingAssistantClient::failing()), store.clone());

        assert!(matches!(controller.suspend(&tenant).await, ToggleOutcome::Failed(_)));
        let stored = store.get(tenant.id).await.unwrap().unwrap();
        assert_eq!(stored.service_status, ServiceStatus::Active);
    }

    #[tokio::test]
    async fn test_tenant_without_assistant_is_skipped() {
        let mut tenant = tenant_with_assistant();
        tenant.assistant_id = None;
        let client = Arc::new(RecordingAssistantClient::default());
        let controller =
            ServiceController::new(client.clone(), Arc::new(InMemoryTenantStore::default()));

        assert_eq!(controller.reactivate(&tenant).await, ToggleOutcome::Skipped);
        assert!(client.calls().await.is_empty());
    }
}
