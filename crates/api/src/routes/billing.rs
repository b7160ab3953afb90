//! Checkout and customer portal links

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use voicedesk_billing::{PlanName, Tenant, TenantStore};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub tenant_id: Uuid,
    pub plan: PlanName,
}

#[derive(Debug, Deserialize)]
pub struct PortalRequest {
    pub tenant_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub url: String,
}

async fn load_tenant(state: &AppState, tenant_id: Uuid) -> ApiResult<Tenant> {
    state
        .billing
        .store
        .get(tenant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Tenant {} not found", tenant_id)))
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<Json<UrlResponse>> {
    let tenant = load_tenant(&state, request.tenant_id).await?;
    let session = state
        .billing
        .checkout
        .checkout_url(&tenant, request.plan)
        .await?;

    Ok(Json(UrlResponse { url: session.url }))
}

pub async fn create_portal(
    State(state): State<AppState>,
    Json(request): Json<PortalRequest>,
) -> ApiResult<Json<UrlResponse>> {
    let tenant = load_tenant(&state, request.tenant_id).await?;
    let portal = state.billing.checkout.portal_url(&tenant).await?;

    Ok(Json(UrlResponse { url: portal.url }))
}
