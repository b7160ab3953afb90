//! HTTP routes

pub mod billing;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/billing/checkout", post(billing::create_checkout))
        .route("/billing/portal", post(billing::create_portal))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use voicedesk_billing::memory::{
        InMemoryAuditLog, InMemoryNotificationLog, InMemoryTenantStore, RecordingAssistantClient,
        RecordingEmailSender,
    };
    use voicedesk_billing::{BillingBackends, BillingService, PriceIds, StripeConfig};

    use crate::config::Config;
    use crate::state::AppState;

    pub const WEBHOOK_SECRET: &str = "whsec_api_test";

    pub struct TestApp {
        pub state: AppState,
        pub store: Arc<InMemoryTenantStore>,
        pub email: Arc<RecordingEmailSender>,
    }

    pub fn test_app() -> TestApp {
        let store = Arc::new(InMemoryTenantStore::default());
        let email = Arc::new(RecordingEmailSender::default());
        let backends = BillingBackends {
            store: store.clone(),
            audit: Arc::new(InMemoryAuditLog::default()),
            notifications: Arc::new(InMemoryNotificationLog::default()),
            email: email.clone(),
            assistant: Arc::new(RecordingAssistantClient::default()),
        };
        let stripe = StripeConfig {
            secret_key: "sk_test_api".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            prices: PriceIds {
                starter: "price_starter".to_string(),
                professional: "price_pro".to_string(),
                business: "price_business".to_string(),
            },
            app_base_url: "http://localhost:3000".to_string(),
        };
        let config = Config {
            bind_address: "127.0.0.1:0".to_string(),
            database_url: "postgres://unused".to_string(),
            webhook_timeout: std::time::Duration::from_secs(5),
            webhook_tolerance_secs: 300,
        };

        let billing = BillingService::new(stripe, backends).unwrap();
        TestApp {
            state: AppState::new(billing, &config),
            store,
            email,
        }
    }

    pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let app = create_router(test_app().state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }
}
