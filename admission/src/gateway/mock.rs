//! In-process payment gateway for development and testing.
//!
//! Always hands out a session unless told to fail, and remembers every
//! charge it was asked for so tests can assert on the outbound request.

use super::{ChargeRequest, GatewayError, PaymentGateway, PaymentSession, StatusSnapshot};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Scriptable mock gateway.
#[derive(Debug, Default)]
pub struct MockPaymentGateway {
    fail: AtomicBool,
    charges: Mutex<Vec<ChargeRequest>>,
    statuses: Mutex<HashMap<String, String>>,
}

impl MockPaymentGateway {
    /// Creates a new mock payment gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make subsequent calls fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Status the gateway reports for `order_id`.
    pub fn set_status(&self, order_id: impl Into<String>, status: impl Into<String>) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(order_id.into(), status.into());
        }
    }

    /// Every charge requested so far.
    #[must_use]
    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_payment(
        &self,
        request: ChargeRequest,
    ) -> BoxFuture<'_, Result<PaymentSession, GatewayError>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(GatewayError::Rejected {
                    status: 503,
                    body: "mock gateway unavailable".to_string(),
                });
            }

            let token = format!("mock_token_{}", uuid::Uuid::new_v4());
            let session = PaymentSession {
                redirect_url: format!("https://pay.example/checkout/{token}"),
                token,
            };
            tracing::info!(
                order_id = %request.order_id,
                amount = request.amount.cents(),
                "Mock payment session created"
            );
            if let Ok(mut charges) = self.charges.lock() {
                charges.push(request);
            }
            Ok(session)
        })
    }

    fn transaction_status(
        &self,
        order_id: &str,
    ) -> BoxFuture<'_, Result<StatusSnapshot, GatewayError>> {
        let order_id = order_id.to_owned();
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(GatewayError::Timeout);
            }
            let charged = self
                .charges
                .lock()
                .ok()
                .and_then(|c| c.iter().find(|r| r.order_id == order_id).cloned());
            let Some(charge) = charged else {
                return Err(GatewayError::Rejected {
                    status: 404,
                    body: format!("order {order_id} not found"),
                });
            };
            let status = self
                .statuses
                .lock()
                .ok()
                .and_then(|s| s.get(&order_id).cloned())
                .unwrap_or_else(|| "pending".to_string());
            Ok(StatusSnapshot {
                order_id,
                transaction_status: status,
                gross_amount: charge.amount.to_string(),
                payment_type: charge.payment_method,
                fraud_status: None,
            })
        })
    }
}
