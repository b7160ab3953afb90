//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External service error ({service}): {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid transition table: {0}")]
    TransitionTable(#[from] crate::transitions::TransitionTableError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    pub fn external(service: &'static str, message: impl Into<String>) -> Self {
        BillingError::ExternalService {
            service,
            message: message.into(),
        }
    }

    /// Errors caused by the caller's input rather than by this system.
    ///
    /// The webhook endpoint answers these with a 4xx so the processor does
    /// not keep redelivering a payload that can never succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::WebhookSignatureInvalid
                | BillingError::MalformedPayload(_)
                | BillingError::InvalidInput(_)
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::StripeApi(e.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(e: reqwest::Error) -> Self {
        BillingError::external("http", e.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(e: serde_json::Error) -> Self {
        BillingError::MalformedPayload(e.to_string())
    }
}
