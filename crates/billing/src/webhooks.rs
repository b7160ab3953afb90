//! Stripe webhook ingest
//!
//! Verifies the `Stripe-Signature` header, decodes the event into the closed
//! set of kinds the lifecycle models and hands the resulting transition
//! request to the reconciler. Side effects are spawned in the background so
//! the acknowledgement never waits on email or the assistant API.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::ActorType;
use crate::plans::{PlanName, PriceIds};
use crate::reconciler::{
    ReconcileOutcome, SideEffectReport, StateReconciler, TenantRef, TransitionRequest,
};
use crate::sweeper::days_left;
use crate::tenant::SubscriptionStatus;
use crate::transitions::EventKind;

type HmacSha256 = Hmac<Sha256>;

/// Default tolerance between the signed timestamp and now
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Verify a `Stripe-Signature` header against the raw payload.
///
/// Header format is `t=<unix>,v1=<hex>[,v1=<hex>...]`; the signed payload is
/// `"{t}.{payload}"` keyed with the endpoint secret.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: OffsetDateTime,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;
    if signatures.is_empty() {
        tracing::warn!("Missing v1 signature in signature header");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let drift = now.unix_timestamp().abs_diff(timestamp);
    if drift > tolerance_secs.unsigned_abs() {
        tracing::warn!(
            timestamp = timestamp,
            drift_secs = drift,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());

    let verified = signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
    if !verified {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }
    Ok(())
}

/// A Stripe reference that may arrive as a bare id or an expanded object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ObjectRef {
    Id(String),
    Object { id: String },
}

impl ObjectRef {
    pub fn id(&self) -> &str {
        match self {
            ObjectRef::Id(id) => id,
            ObjectRef::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub customer: Option<ObjectRef>,
    #[serde(default)]
    pub subscription: Option<ObjectRef>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub price: Option<PriceRef>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: ObjectRef,
    pub status: String,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub items: SubscriptionItems,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: ObjectRef,
    #[serde(default)]
    pub subscription: Option<ObjectRef>,
    #[serde(default)]
    pub amount_due: Option<i64>,
    #[serde(default)]
    pub amount_paid: Option<i64>,
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
    #[serde(default)]
    pub billing_reason: Option<String>,
}

/// Decoded processor event
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEvent {
    CheckoutCompleted {
        id: String,
        session: CheckoutSessionObject,
    },
    SubscriptionCreated {
        id: String,
        subscription: SubscriptionObject,
    },
    SubscriptionUpdated {
        id: String,
        subscription: SubscriptionObject,
    },
    SubscriptionDeleted {
        id: String,
        subscription: SubscriptionObject,
    },
    TrialWillEnd {
        id: String,
        created: i64,
        subscription: SubscriptionObject,
    },
    InvoicePaid {
        id: String,
        invoice: InvoiceObject,
    },
    InvoicePaymentFailed {
        id: String,
        invoice: InvoiceObject,
    },
    /// Accepted and acknowledged, never acted on
    Unrecognized {
        id: String,
        event_type: String,
        raw: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

fn decode_object<T: serde::de::DeserializeOwned>(
    event_type: &str,
    object: serde_json::Value,
) -> BillingResult<T> {
    serde_json::from_value(object)
        .map_err(|e| BillingError::MalformedPayload(format!("{} object: {}", event_type, e)))
}

/// Decode a verified payload
pub fn decode_event(payload: &str) -> BillingResult<ProcessorEvent> {
    let raw: serde_json::Value = serde_json::from_str(payload)?;
    let envelope: EventEnvelope = serde_json::from_value(raw.clone())
        .map_err(|e| BillingError::MalformedPayload(format!("event envelope: {}", e)))?;

    let EventEnvelope {
        id,
        event_type,
        created,
        data,
    } = envelope;
    let object = data.object;

    let event = match event_type.as_str() {
        "checkout.session.completed" => ProcessorEvent::CheckoutCompleted {
            id,
            session: decode_object(&event_type, object)?,
        },
        "customer.subscription.created" => ProcessorEvent::SubscriptionCreated {
            id,
            subscription: decode_object(&event_type, object)?,
        },
        "customer.subscription.updated" => ProcessorEvent::SubscriptionUpdated {
            id,
            subscription: decode_object(&event_type, object)?,
        },
        "customer.subscription.deleted" => ProcessorEvent::SubscriptionDeleted {
            id,
            subscription: decode_object(&event_type, object)?,
        },
        "customer.subscription.trial_will_end" => ProcessorEvent::TrialWillEnd {
            id,
            created,
            subscription: decode_object(&event_type, object)?,
        },
        "invoice.paid" | "invoice.payment_succeeded" => ProcessorEvent::InvoicePaid {
            id,
            invoice: decode_object(&event_type, object)?,
        },
        "invoice.payment_failed" => ProcessorEvent::InvoicePaymentFailed {
            id,
            invoice: decode_object(&event_type, object)?,
        },
        _ => ProcessorEvent::Unrecognized {
            id,
            event_type,
            raw,
        },
    };
    Ok(event)
}

fn tenant_from_metadata(metadata: &HashMap<String, String>) -> Option<Uuid> {
    metadata
        .get("tenant_id")
        .and_then(|id| Uuid::parse_str(id).ok())
}

fn subscription_tenant(subscription: &SubscriptionObject) -> TenantRef {
    match tenant_from_metadata(&subscription.metadata) {
        Some(id) => TenantRef::Id(id),
        None => TenantRef::ExternalCustomer(subscription.customer.id().to_string()),
    }
}

fn subscription_plan(subscription: &SubscriptionObject, prices: &PriceIds) -> Option<PlanName> {
    subscription
        .metadata
        .get("plan")
        .and_then(|p| p.parse().ok())
        .or_else(|| {
            subscription
                .items
                .data
                .iter()
                .filter_map(|item| item.price.as_ref())
                .find_map(|price| prices.plan_for_price(&price.id))
        })
}

impl ProcessorEvent {
    pub fn id(&self) -> &str {
        match self {
            ProcessorEvent::CheckoutCompleted { id, .. }
            | ProcessorEvent::SubscriptionCreated { id, .. }
            | ProcessorEvent::SubscriptionUpdated { id, .. }
            | ProcessorEvent::SubscriptionDeleted { id, .. }
            | ProcessorEvent::TrialWillEnd { id, .. }
            | ProcessorEvent::InvoicePaid { id, .. }
            | ProcessorEvent::InvoicePaymentFailed { id, .. }
            | ProcessorEvent::Unrecognized { id, .. } => id,
        }
    }

    pub fn kind(&self) -> Option<EventKind> {
        match self {
            ProcessorEvent::CheckoutCompleted { .. } => Some(EventKind::CheckoutCompleted),
            ProcessorEvent::SubscriptionCreated { .. } => Some(EventKind::SubscriptionCreated),
            ProcessorEvent::SubscriptionUpdated { .. } => Some(EventKind::SubscriptionUpdated),
            ProcessorEvent::SubscriptionDeleted { .. } => Some(EventKind::SubscriptionDeleted),
            ProcessorEvent::TrialWillEnd { .. } => Some(EventKind::TrialWillEnd),
            ProcessorEvent::InvoicePaid { .. } => Some(EventKind::InvoicePaid),
            ProcessorEvent::InvoicePaymentFailed { .. } => Some(EventKind::InvoicePaymentFailed),
            ProcessorEvent::Unrecognized { .. } => None,
        }
    }

    /// Processor event type as logged
    pub fn event_type(&self) -> &str {
        match self {
            ProcessorEvent::Unrecognized { event_type, .. } => event_type,
            other => other.kind().map(|k| k.as_str()).unwrap_or("unknown"),
        }
    }

    /// Map the event onto a transition request.
    ///
    /// `None` for unrecognized kinds and for events that cannot be tied to a
    /// tenant (a checkout without tenant reference or customer, or a one-off
    /// payment checkout).
    pub fn transition_request(&self, prices: &PriceIds) -> Option<TransitionRequest> {
        let kind = self.kind()?;

        let mut request = match self {
            ProcessorEvent::CheckoutCompleted { session, .. } => {
                if session
                    .mode
                    .as_deref()
                    .is_some_and(|mode| mode != "subscription")
                {
                    return None;
                }
                let tenant_id = tenant_from_metadata(&session.metadata).or_else(|| {
                    session
                        .client_reference_id
                        .as_deref()
                        .and_then(|id| Uuid::parse_str(id).ok())
                });
                let tenant = match (tenant_id, &session.customer) {
                    (Some(id), _) => TenantRef::Id(id),
                    (None, Some(customer)) => {
                        TenantRef::ExternalCustomer(customer.id().to_string())
                    }
                    (None, None) => return None,
                };

                let mut request = TransitionRequest::new(tenant, kind, ActorType::Stripe);
                request.plan = session.metadata.get("plan").and_then(|p| p.parse().ok());
                request.external_customer_id =
                    session.customer.as_ref().map(|c| c.id().to_string());
                request.external_subscription_id =
                    session.subscription.as_ref().map(|s| s.id().to_string());
                request.amount_cents = session.amount_total;
                request
            }
            ProcessorEvent::SubscriptionCreated { subscription, .. }
            | ProcessorEvent::SubscriptionUpdated { subscription, .. }
            | ProcessorEvent::SubscriptionDeleted { subscription, .. } => {
                let mut request = TransitionRequest::new(
                    subscription_tenant(subscription),
                    kind,
                    ActorType::Stripe,
                );
                request.plan = subscription_plan(subscription, prices);
                request.external_subscription_id = Some(subscription.id.clone());
                request.reported_status = SubscriptionStatus::from_processor(&subscription.status);
                request
            }
            ProcessorEvent::TrialWillEnd {
                created,
                subscription,
                ..
            } => {
                let mut request = TransitionRequest::new(
                    subscription_tenant(subscription),
                    kind,
                    ActorType::Stripe,
                );
                let sent_at = OffsetDateTime::from_unix_timestamp(*created)
                    .unwrap_or_else(|_| OffsetDateTime::now_utc());
                request.days_left = Some(
                    subscription
                        .trial_end
                        .and_then(|end| OffsetDateTime::from_unix_timestamp(end).ok())
                        .map(|end| days_left(end, sent_at).max(1))
                        .unwrap_or(3),
                );
                request
            }
            ProcessorEvent::InvoicePaid { invoice, .. }
            | ProcessorEvent::InvoicePaymentFailed { invoice, .. } => {
                let mut request = TransitionRequest::new(
                    TenantRef::ExternalCustomer(invoice.customer.id().to_string()),
                    kind,
                    ActorType::Stripe,
                );
                request.external_subscription_id =
                    invoice.subscription.as_ref().map(|s| s.id().to_string());
                request.invoice_url = invoice.hosted_invoice_url.clone();
                if kind == EventKind::InvoicePaid {
                    request.amount_cents = invoice.amount_paid;
                    // `invoice.paid` and `invoice.payment_succeeded` report the
                    // same payment under different event ids
                    request.dedupe_key = Some(format!("invoice_paid:{}", invoice.id));
                } else {
                    request.amount_cents = invoice.amount_due;
                }
                request
            }
            ProcessorEvent::Unrecognized { .. } => return None,
        };

        request.external_event_id = Some(self.id().to_string());
        Some(request)
    }
}

/// Result of handling one delivery
#[derive(Debug)]
pub enum WebhookOutcome {
    Processed {
        outcome: ReconcileOutcome,
        /// Background side effects, if any were owed
        side_effects: Option<JoinHandle<SideEffectReport>>,
    },
    /// Verified but not modelled, or not tied to a tenant
    Ignored { event_type: String },
}

#[derive(Clone)]
pub struct WebhookHandler {
    reconciler: StateReconciler,
    prices: PriceIds,
    secret: String,
    tolerance_secs: i64,
}

impl WebhookHandler {
    pub fn new(reconciler: StateReconciler, prices: PriceIds, secret: impl Into<String>) -> Self {
        Self {
            reconciler,
            prices,
            secret: secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verify, decode and apply one delivery.
    ///
    /// Client errors (bad signature, malformed payload) are returned before
    /// anything is read or written.
    pub async fn handle(&self, payload: &str, signature: &str) -> BillingResult<WebhookOutcome> {
        if self.secret.is_empty() {
            return Err(BillingError::Config(
                "STRIPE_WEBHOOK_SECRET is not set".to_string(),
            ));
        }
        verify_signature(
            payload,
            signature,
            &self.secret,
            self.tolerance_secs,
            OffsetDateTime::now_utc(),
        )?;

        let event = decode_event(payload)?;
        let event_type = event.event_type().to_string();

        let Some(request) = event.transition_request(&self.prices) else {
            tracing::info!(
                event_id = %event.id(),
                event_type = %event_type,
                "Webhook event not modelled - acknowledged without action"
            );
            return Ok(WebhookOutcome::Ignored { event_type });
        };

        tracing::info!(
            event_id = %event.id(),
            event_type = %event_type,
            tenant = %request.tenant,
            "Processing Stripe webhook event"
        );

        // Once the status write commits, the audit record and side effects
        // must follow even if the caller stops waiting on this future.
        let reconciler = self.reconciler.clone();
        let applying = tokio::spawn(async move {
            let outcome = reconciler.apply(&request).await?;

            let side_effects = match &outcome {
                ReconcileOutcome::Applied { effects, .. } if !effects.is_empty() => {
                    let reconciler = reconciler.clone();
                    let effects = effects.clone();
                    Some(tokio::spawn(async move { reconciler.execute(&effects).await }))
                }
                _ => None,
            };

            Ok::<_, BillingError>(WebhookOutcome::Processed {
                outcome,
                side_effects,
            })
        });

        applying
            .await
            .map_err(|e| BillingError::Internal(format!("Webhook task failed: {}", e)))?
    }
}

/// Build a `Stripe-Signature` header for `payload`
pub fn sign_payload(payload: &str, secret: &str, timestamp: i64) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::Internal(format!("Invalid signing key: {}", e)))?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
        sign_payload(payload, secret, timestamp).unwrap()
    }

    #[test]
    fn test_valid_signature_accepted() {
        let now = OffsetDateTime::now_utc();
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, SECRET, now.unix_timestamp());
        assert!(verify_signature(payload, &header, SECRET, 300, now).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let now = OffsetDateTime::now_utc();
        let header = sign(r#"{"id":"evt_1"}"#, SECRET, now.unix_timestamp());
        let err = verify_signature(r#"{"id":"evt_2"}"#, &header, SECRET, 300, now).unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let now = OffsetDateTime::now_utc();
        let payload = "{}";
        let header = sign(payload, "whsec_other", now.unix_timestamp());
        assert!(verify_signature(payload, &header, SECRET, 300, now).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let now = OffsetDateTime::now_utc();
        let payload = "{}";
        let header = sign(payload, SECRET, now.unix_timestamp() - 301);
        assert!(verify_signature(payload, &header, SECRET, 300, now).is_err());

        let header = sign(payload, SECRET, now.unix_timestamp() - 299);
        assert!(verify_signature(payload, &header, SECRET, 300, now).is_ok());
    }

    #[test]
    fn test_any_matching_v1_accepted() {
        let now = OffsetDateTime::now_utc();
        let payload = "{}";
        let good = sign(payload, SECRET, now.unix_timestamp());
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!(
            "t={},v1={},v1={}",
            now.unix_timestamp(),
            "00".repeat(32),
            good_sig
        );
        assert!(verify_signature(payload, &header, SECRET, 300, now).is_ok());
    }

    #[test]
    fn test_malformed_header_rejected() {
        let now = OffsetDateTime::now_utc();
        for header in [
            "",
            "t=abc,v1=00",
            "v1=deadbeef",
            "t=1700000000",
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            assert!(
                verify_signature("{}", header, SECRET, 300, now).is_err(),
                "{}",
                header
            );
        }
    }

    fn prices() -> PriceIds {
        PriceIds {
            starter: "price_starter".to_string(),
            professional: "price_pro".to_string(),
            business: "price_business".to_string(),
        }
    }

    #[test]
    fn test_decode_checkout_with_metadata_tenant() {
        let tenant_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "id": "evt_checkout",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": { "object": {
                "id": "cs_1",
                "mode": "subscription",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "tenant_id": tenant_id.to_string(), "plan": "business" }
            }}
        })
        .to_string();

        let event = decode_event(&payload).unwrap();
        let request = event.transition_request(&prices()).unwrap();
        assert_eq!(request.tenant, TenantRef::Id(tenant_id));
        assert_eq!(request.event, EventKind::CheckoutCompleted);
        assert_eq!(request.plan, Some(PlanName::Business));
        assert_eq!(request.external_customer_id.as_deref(), Some("cus_1"));
        assert_eq!(request.external_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(request.external_event_id.as_deref(), Some("evt_checkout"));
    }

    #[test]
    fn test_payment_mode_checkout_is_ignored() {
        let payload = serde_json::json!({
            "id": "evt_pay",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_2", "mode": "payment", "customer": "cus_1" } }
        })
        .to_string();
        let event = decode_event(&payload).unwrap();
        assert!(event.transition_request(&prices()).is_none());
    }

    #[test]
    fn test_subscription_updated_maps_status_and_price() {
        let payload = serde_json::json!({
            "id": "evt_upd",
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_1",
                "customer": { "id": "cus_9", "object": "customer" },
                "status": "past_due",
                "items": { "data": [ { "price": { "id": "price_pro" } } ] }
            }}
        })
        .to_string();

        let request = decode_event(&payload)
            .unwrap()
            .transition_request(&prices())
            .unwrap();
        assert_eq!(
            request.tenant,
            TenantRef::ExternalCustomer("cus_9".to_string())
        );
        assert_eq!(request.reported_status, Some(SubscriptionStatus::PastDue));
        assert_eq!(request.plan, Some(PlanName::Professional));
    }

    #[test]
    fn test_invoice_events_share_payment_dedupe_key() {
        let object = serde_json::json!({
            "id": "in_1",
            "customer": "cus_1",
            "amount_paid": 4900,
            "hosted_invoice_url": "https://invoice.example/in_1"
        });
        let paid = serde_json::json!({
            "id": "evt_a", "type": "invoice.paid", "data": { "object": object.clone() }
        })
        .to_string();
        let succeeded = serde_json::json!({
            "id": "evt_b", "type": "invoice.payment_succeeded", "data": { "object": object }
        })
        .to_string();

        let a = decode_event(&paid)
            .unwrap()
            .transition_request(&prices())
            .unwrap();
        let b = decode_event(&succeeded)
            .unwrap()
            .transition_request(&prices())
            .unwrap();
        assert_eq!(a.event, EventKind::InvoicePaid);
        assert_eq!(a.idempotency_key(), b.idempotency_key());
        assert_ne!(a.external_event_id, b.external_event_id);
        assert_eq!(a.amount_cents, Some(4900));
    }

    #[test]
    fn test_trial_will_end_days_left() {
        let created = 1_700_000_000_i64;
        let payload = serde_json::json!({
            "id": "evt_twe",
            "type": "customer.subscription.trial_will_end",
            "created": created,
            "data": { "object": {
                "id": "sub_1",
                "customer": "cus_1",
                "status": "trialing",
                "trial_end": created + 3 * 86_400
            }}
        })
        .to_string();

        let request = decode_event(&payload)
            .unwrap()
            .transition_request(&prices())
            .unwrap();
        assert_eq!(request.days_left, Some(3));
        assert_eq!(request.reported_status, None);
    }

    #[test]
    fn test_unknown_event_is_unrecognized() {
        let payload =
            r#"{"id":"evt_x","type":"customer.tax_id.created","data":{"object":{"id":"txi_1"}}}"#;
        let event = decode_event(payload).unwrap();
        match &event {
            ProcessorEvent::Unrecognized {
                event_type, raw, ..
            } => {
                assert_eq!(event_type, "customer.tax_id.created");
                assert_eq!(raw["data"]["object"]["id"], "txi_1");
            }
            other => panic!("expected unrecognized, got {:?}", other),
        }
        assert!(event.transition_request(&prices()).is_none());
    }

    #[test]
    fn test_malformed_payloads_are_client_errors() {
        let not_json = decode_event("not json").unwrap_err();
        assert!(not_json.is_client_error());

        let missing_customer =
            r#"{"id":"evt_1","type":"invoice.payment_failed","data":{"object":{"id":"in_1"}}}"#;
        let err = decode_event(missing_customer).unwrap_err();
        assert!(matches!(err, BillingError::MalformedPayload(_)));
    }
}
