//! Stripe webhook endpoint
//!
//! Verifies and applies one delivery, then acknowledges. The status write
//! happens before the response; emails and assistant changes continue in
//! the background.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use voicedesk_billing::WebhookOutcome;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const HEADER_SIGNATURE: &str = "stripe-signature";

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(HEADER_SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation("Missing Stripe-Signature header".to_string()))?;

    let handled = tokio::time::timeout(
        state.webhook_timeout,
        state.billing.webhooks.handle(&body, signature),
    )
    .await
    .map_err(|_| {
        tracing::error!(
            timeout_secs = state.webhook_timeout.as_secs(),
            "Webhook handling timed out"
        );
        ApiError::Timeout
    })?;

    match handled {
        Ok(WebhookOutcome::Processed { outcome, .. }) => {
            tracing::info!(outcome = outcome.as_str(), "Webhook acknowledged");
        }
        Ok(WebhookOutcome::Ignored { event_type }) => {
            tracing::debug!(event_type = %event_type, "Webhook ignored");
        }
        Err(e) => {
            if e.is_client_error() {
                tracing::warn!(error = %e, "Rejected webhook delivery");
            }
            return Err(e.into());
        }
    }

    Ok(Json(json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use crate::routes::create_router;
    use crate::routes::test_support::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use time::OffsetDateTime;
    use tower::ServiceExt;
    use voicedesk_billing::webhooks::sign_payload;
    use voicedesk_billing::{SubscriptionStatus, Tenant, TenantStore};

    fn webhook_request(payload: &str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhooks/stripe")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        builder.body(Body::from(payload.to_string())).unwrap()
    }

    fn sign(payload: &str) -> String {
        sign_payload(payload, WEBHOOK_SECRET, OffsetDateTime::now_utc().unix_timestamp()).unwrap()
    }

    fn checkout_payload(tenant: &Tenant) -> String {
        serde_json::json!({
            "id": "evt_api_checkout",
            "type": "checkout.session.completed",
            "created": OffsetDateTime::now_utc().unix_timestamp(),
            "data": { "object": {
                "id": "cs_api",
                "mode": "subscription",
                "customer": "cus_api",
                "subscription": "sub_api",
                "metadata": { "tenant_id": tenant.id.to_string(), "plan": "starter" }
            }}
        })
        .to_string()
    }

    async fn trial_tenant(app: &TestApp) -> Tenant {
        let tenant = Tenant::new_trial(
            "Harbor Plumbing",
            "owner@harbor.test",
            OffsetDateTime::now_utc() + time::Duration::days(4),
        );
        app.store.insert(tenant.clone()).await;
        tenant
    }

    #[tokio::test]
    async fn test_valid_checkout_webhook_activates_tenant() {
        let app = test_app();
        let tenant = trial_tenant(&app).await;
        let payload = checkout_payload(&tenant);

        let response = create_router(app.state.clone())
            .oneshot(webhook_request(&payload, Some(sign(&payload))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["received"], true);

        let stored = app.store.get(tenant.id).await.unwrap().unwrap();
        assert_eq!(stored.subscription_status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_missing_signature_is_400() {
        let app = test_app();
        let response = create_router(app.state)
            .oneshot(webhook_request("{}", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_forged_signature_is_400_and_changes_nothing() {
        let app = test_app();
        let tenant = trial_tenant(&app).await;
        let payload = checkout_payload(&tenant);
        let forged =
            sign_payload(&payload, "whsec_other", OffsetDateTime::now_utc().unix_timestamp())
                .unwrap();

        let response = create_router(app.state.clone())
            .oneshot(webhook_request(&payload, Some(forged)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let stored = app.store.get(tenant.id).await.unwrap().unwrap();
        assert_eq!(stored.subscription_status, SubscriptionStatus::Trial);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_400() {
        let app = test_app();
        let payload = r#"{"id": "evt_1"}"#;
        let response = create_router(app.state)
            .oneshot(webhook_request(payload, Some(sign(payload))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unmodelled_event_is_acknowledged() {
        let app = test_app();
        let payload = serde_json::json!({
            "id": "evt_misc",
            "type": "customer.updated",
            "data": { "object": { "id": "cus_api" } }
        })
        .to_string();

        let response = create_router(app.state)
            .oneshot(webhook_request(&payload, Some(sign(&payload))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_store_failure_is_500() {
        let app = test_app();
        let tenant = trial_tenant(&app).await;
        app.store.fail_writes(true);
        let payload = checkout_payload(&tenant);

        let response = create_router(app.state.clone())
            .oneshot(webhook_request(&payload, Some(sign(&payload))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Internal server error");
        assert!(app.email.sent().await.is_empty());
    }
}
