//! Checkout and customer portal links
//!
//! Purely informational: creating a session never changes tenant state. The
//! tenant moves to `active` only when the `checkout.session.completed`
//! webhook arrives.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionMode, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionSubscriptionData,
    CustomerId,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::plans::PlanName;
use crate::tenant::Tenant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalResponse {
    pub url: String,
}

#[derive(Clone)]
pub struct CheckoutService {
    stripe: StripeClient,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    fn ensure_can_subscribe(tenant: &Tenant) -> BillingResult<()> {
        if tenant.subscription_status.is_paid() {
            return Err(BillingError::InvalidInput(format!(
                "Tenant is already {}; manage the subscription from the billing portal",
                tenant.subscription_status
            )));
        }
        Ok(())
    }

    /// Subscription-mode checkout session for `plan`
    pub async fn checkout_url(
        &self,
        tenant: &Tenant,
        plan: PlanName,
    ) -> BillingResult<CheckoutResponse> {
        Self::ensure_can_subscribe(tenant)?;

        let config = self.stripe.config();
        let price_id = config.prices.price_for(plan)?.to_string();
        let tenant_id = tenant.id.to_string();
        let success_url = format!(
            "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
            config.app_base_url
        );
        let cancel_url = format!("{}/billing", config.app_base_url);

        let mut metadata = HashMap::new();
        metadata.insert("tenant_id".to_string(), tenant_id.clone());
        metadata.insert("plan".to_string(), plan.as_str().to_string());

        let customer_id = tenant
            .external_customer_id
            .as_deref()
            .map(parse_customer_id)
            .transpose()?;

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.success_url = Some(success_url.as_str());
        params.cancel_url = Some(cancel_url.as_str());
        params.client_reference_id = Some(tenant_id.as_str());
        match customer_id {
            Some(customer_id) => params.customer = Some(customer_id),
            None => params.customer_email = Some(tenant.billing_email.as_str()),
        }
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.subscription_data = Some(CreateCheckoutSessionSubscriptionData {
            metadata: Some(metadata.clone()),
            ..Default::default()
        });
        params.metadata = Some(metadata);

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;
        let url = session.url.ok_or_else(|| {
            BillingError::StripeApi("Checkout session returned without a URL".to_string())
        })?;

        tracing::info!(
            tenant_id = %tenant.id,
            plan = plan.as_str(),
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            url,
        })
    }

    /// Customer portal session for a tenant with a processor customer
    pub async fn portal_url(&self, tenant: &Tenant) -> BillingResult<PortalResponse> {
        let customer = tenant.external_customer_id.as_deref().ok_or_else(|| {
            BillingError::InvalidInput("Tenant has no billing account yet".to_string())
        })?;
        let customer_id = parse_customer_id(customer)?;
        let return_url = format!("{}/billing", self.stripe.config().app_base_url);

        let mut params = CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(return_url.as_str());

        let session = BillingPortalSession::create(self.stripe.inner(), params).await?;

        tracing::info!(tenant_id = %tenant.id, "Created billing portal session");

        Ok(PortalResponse { url: session.url })
    }
}

fn parse_customer_id(customer: &str) -> BillingResult<CustomerId> {
    customer
        .parse::<CustomerId>()
        .map_err(|e| BillingError::InvalidInput(format!("Invalid customer id {}: {}", customer, e)))
}
