//! Payment gateway boundary.
//!
//! The gateway is an opaque remote service: we ask it for a payment session
//! (token + redirect URL), and later it calls us back with a signed
//! [`PaymentNotification`]. [`SnapGateway`] speaks the hosted-checkout HTTP
//! API; [`MockPaymentGateway`] stands in for development and tests.

pub mod mock;
pub mod signature;
pub mod snap;

pub use mock::MockPaymentGateway;
pub use signature::{sign_notification, verify_notification};
pub use snap::SnapGateway;

use crate::types::{Money, TicketId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payment sessions expire this many minutes after creation.
pub const PAYMENT_EXPIRY_MINUTES: u32 = 60;

/// Gateway failure.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// No response within the configured timeout
    #[error("gateway timeout")]
    Timeout,
    /// Gateway answered with a non-success status
    #[error("gateway rejected request (status {status}): {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },
    /// Connection or protocol failure
    #[error("gateway request failed: {0}")]
    Transport(String),
    /// Response could not be decoded
    #[error("gateway response parsing failed: {0}")]
    Decode(String),
}

/// Buyer identity sent with a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Display name
    pub name: String,
    /// Email for receipts
    pub email: String,
}

/// Line item sent with a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Item identifier (the event id)
    pub id: String,
    /// Item name (the event title)
    pub name: String,
    /// Unit price
    pub price: Money,
    /// Quantity
    pub quantity: u32,
}

/// Request for a payment session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Our order identifier, echoed back in notifications
    pub order_id: String,
    /// Total to charge
    pub amount: Money,
    /// Buyer
    pub customer: Customer,
    /// What is being bought
    pub item: LineItem,
    /// Restrict the checkout to one payment method
    pub payment_method: Option<String>,
}

/// A payment session the buyer completes on the gateway's page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    /// Client-side token
    pub token: String,
    /// Hosted checkout URL
    pub redirect_url: String,
}

/// Gateway's current view of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Order identifier
    pub order_id: String,
    /// Gateway status code (`settlement`, `pending`, ...)
    pub transaction_status: String,
    /// Reported amount as a decimal string
    #[serde(default)]
    pub gross_amount: String,
    /// Payment channel used
    #[serde(default)]
    pub payment_type: Option<String>,
    /// Fraud screening verdict
    #[serde(default)]
    pub fraud_status: Option<String>,
}

/// Asynchronous status notification delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    /// Order identifier (our external reference)
    pub order_id: String,
    /// Gateway HTTP-style status code, part of the signed payload
    pub status_code: String,
    /// Reported amount as a decimal string
    pub gross_amount: String,
    /// Gateway status vocabulary
    pub transaction_status: String,
    /// Reported currency
    #[serde(default)]
    pub currency: Option<String>,
    /// Payment channel used
    #[serde(default)]
    pub payment_type: Option<String>,
    /// Fraud screening verdict
    #[serde(default)]
    pub fraud_status: Option<String>,
    /// Hex signature over the identifying fields
    pub signature_key: String,
}

/// Remote payment gateway.
pub trait PaymentGateway: Send + Sync {
    /// Open a payment session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the gateway refuses or cannot be reached.
    fn create_payment(
        &self,
        request: ChargeRequest,
    ) -> BoxFuture<'_, Result<PaymentSession, GatewayError>>;

    /// Query the gateway's current status for an order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the gateway refuses or cannot be reached.
    fn transaction_status(&self, order_id: &str)
    -> BoxFuture<'_, Result<StatusSnapshot, GatewayError>>;
}

/// Order identifier for a ticket's payment attempt: `<ticket_id>-<unix_seconds>`.
#[must_use]
pub fn order_id_for(ticket_id: TicketId, at: DateTime<Utc>) -> String {
    format!("{ticket_id}-{}", at.timestamp())
}
