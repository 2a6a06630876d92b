//! Payment gateway adapter.
//!
//! The coordinator asks the gateway for a payment session (an external
//! reference plus a redirect URL) and later receives the outcome through an
//! asynchronous callback. Signature checking is the adapter's business: the
//! coordinator only sees [`PaymentGateway::verify_callback`].

use marquee_core::types::{Money, OrderId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, PaymentGatewayError>;

/// Payment gateway error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentGatewayError {
    /// The gateway refused to create the payment
    #[error("payment rejected: {reason}")]
    Rejected {
        /// Gateway message
        reason: String,
    },
    /// The gateway did not answer in time
    #[error("gateway timeout")]
    Timeout,
    /// Transport or protocol failure
    #[error("payment error: {message}")]
    Other {
        /// Error message
        message: String,
    },
}

/// Payment creation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Our order, echoed back in callbacks as `order_ref`
    pub order_id: OrderId,
    /// Amount to charge
    pub amount: Money,
    /// Text shown on the gateway page
    pub description: String,
}

/// Payment created at the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySession {
    /// Gateway transaction reference
    pub external_ref: String,
    /// Where the customer completes payment
    pub redirect_url: String,
}

/// Asynchronous payment outcome posted by the gateway.
///
/// ```json
/// { "order_ref": "…", "result_code": "0", "message": "Successful.",
///   "transaction_ref": "mock_txn_…", "signature": "…" }
/// ```
///
/// Some gateways post `result_code` as a JSON number; both forms are accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCallback {
    /// Order id, or the external reference
    pub order_ref: String,
    /// `0` means paid, anything else is a failure
    #[serde(deserialize_with = "text_or_number")]
    pub result_code: String,
    /// Gateway message
    #[serde(default)]
    pub message: String,
    /// Gateway transaction reference
    #[serde(default)]
    pub transaction_ref: Option<String>,
    /// Opaque authenticity proof checked by the adapter
    #[serde(default)]
    pub signature: Option<String>,
}

fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Code::deserialize(deserializer)? {
        Code::Text(text) => text,
        Code::Number(number) => number.to_string(),
    })
}

impl GatewayCallback {
    /// Whether the gateway reports a successful payment
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result_code.trim().parse::<i64>() == Ok(0)
    }
}

/// Payment gateway trait
///
/// Abstraction over hosted-checkout processors.
pub trait PaymentGateway: Send + Sync {
    /// Create a payment and obtain its redirect.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError::Rejected`] if the gateway refuses the
    /// payment, other variants on transport failure.
    fn create_payment(
        &self,
        request: PaymentRequest,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<GatewaySession>> + Send>>;

    /// Whether a callback really comes from the gateway
    fn verify_callback(&self, callback: &GatewayCallback) -> bool;
}

/// Mock payment gateway for development.
///
/// Every payment is created successfully and every callback is accepted as
/// authentic.
#[derive(Clone, Debug)]
pub struct MockPaymentGateway {
    redirect_base_url: String,
}

impl MockPaymentGateway {
    /// Creates a mock gateway redirecting to `redirect_base_url`
    #[must_use]
    pub fn new(redirect_base_url: impl Into<String>) -> Self {
        Self {
            redirect_base_url: redirect_base_url.into(),
        }
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared(redirect_base_url: impl Into<String>) -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new(redirect_base_url))
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new("http://localhost:8080/mock-gateway")
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_payment(
        &self,
        request: PaymentRequest,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<GatewaySession>> + Send>> {
        let base = self.redirect_base_url.trim_end_matches('/').to_string();
        Box::pin(async move {
            let external_ref = format!("mock_txn_{}", uuid::Uuid::new_v4().simple());

            tracing::info!(
                order_id = %request.order_id,
                amount = request.amount.amount(),
                external_ref = %external_ref,
                "Mock payment created"
            );

            Ok(GatewaySession {
                redirect_url: format!("{base}/pay/{external_ref}?order={}", request.order_id),
                external_ref,
            })
        })
    }

    fn verify_callback(&self, _callback: &GatewayCallback) -> bool {
        true
    }
}
