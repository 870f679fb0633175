//! Payment notification reconciler.
//!
//! Order of checks for each notification:
//!
//! 1. Signature over the identifying fields; a mismatch is rejected before
//!    anything is read.
//! 2. Gateway status through the fixed lookup table; `no-action` stops here.
//!    The unsigned status must agree with the signed `status_code`, otherwise
//!    the notification is rejected like a bad signature.
//! 3. Stored transaction lookup and amount check within the fixed tolerance.
//! 4. Conditional write `pending -> success|failed`. Losing it means an
//!    earlier delivery already applied this outcome.
//! 5. The ticket command that follows from the outcome.
//!
//! Idempotency rests entirely on step 4, a durable compare-and-set, so
//! duplicates landing on different replicas are harmless.

use crate::clock::Clock;
use crate::error::ReconcileError;
use crate::gateway::{PaymentNotification, verify_notification};
use crate::lifecycle::{Applied, TicketLifecycle};
use crate::machines::transaction::{self, classify};
use crate::store::AdmissionStore;
use crate::types::{TicketStatus, TransactionStatus};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a notification achieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Transaction moved to a terminal status
    Applied {
        /// Gateway order id
        order_id: String,
        /// New transaction status
        internal_status: TransactionStatus,
        /// New ticket status, if this delivery moved the ticket
        ticket_status: Option<TicketStatus>,
    },
    /// An earlier delivery already settled the transaction
    AlreadyProcessed {
        /// Gateway order id
        order_id: String,
    },
    /// Status needs no action (pending, refund-equivalent or unknown)
    NoAction {
        /// Gateway order id
        order_id: String,
        /// Status as the gateway reported it
        gateway_status: String,
    },
}

impl ReconcileOutcome {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::AlreadyProcessed { .. } => "already_processed",
            Self::NoAction { .. } => "no_action",
        }
    }
}

/// Applies gateway notifications.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn AdmissionStore>,
    lifecycle: TicketLifecycle,
    clock: Arc<dyn Clock>,
    server_key: String,
}

impl Reconciler {
    /// Create a reconciler verifying against `server_key`.
    #[must_use]
    pub fn new(
        store: Arc<dyn AdmissionStore>,
        clock: Arc<dyn Clock>,
        server_key: impl Into<String>,
    ) -> Self {
        let lifecycle = TicketLifecycle::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            lifecycle,
            clock,
            server_key: server_key.into(),
        }
    }

    /// Apply one notification.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::InvalidSignature`]: rejected, nothing touched
    /// - [`ReconcileError::AmountMismatch`]: rejected, nothing touched
    /// - [`ReconcileError::TransactionNotFound`] / [`ReconcileError::TicketNotFound`]
    /// - [`ReconcileError::Transition`]: the transaction settled but the
    ///   ticket had already left `pending` and needs manual follow-up
    /// - [`ReconcileError::Store`]
    pub async fn reconcile(
        &self,
        notification: &PaymentNotification,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let result = self.run(notification).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(ReconcileError::InvalidSignature) => "invalid_signature",
            Err(ReconcileError::AmountMismatch { .. }) => "amount_mismatch",
            Err(_) => "error",
        };
        metrics::counter!("admission_webhooks_total", "outcome" => outcome).increment(1);
        result
    }

    async fn run(
        &self,
        notification: &PaymentNotification,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let order_id = notification.order_id.as_str();

        if !verify_notification(notification, &self.server_key) {
            warn!(order_id, "Notification signature rejected");
            return Err(ReconcileError::InvalidSignature);
        }

        let outcome = classify(&notification.transaction_status);
        if !outcome.accepts_status_code(&notification.status_code) {
            warn!(
                order_id,
                status_code = %notification.status_code,
                gateway_status = %notification.transaction_status,
                "Notification status disagrees with its signed status code"
            );
            return Err(ReconcileError::InvalidSignature);
        }
        let (Some(to), Some(command)) = (outcome.transaction_status(), outcome.ticket_command())
        else {
            debug!(
                order_id,
                gateway_status = %notification.transaction_status,
                "Notification needs no action"
            );
            return Ok(ReconcileOutcome::NoAction {
                order_id: order_id.to_string(),
                gateway_status: notification.transaction_status.clone(),
            });
        };

        let stored = self
            .store
            .transaction_by_ref(order_id)
            .await?
            .ok_or_else(|| ReconcileError::TransactionNotFound(order_id.to_string()))?;

        if !stored.amount.matches_reported(&notification.gross_amount) {
            warn!(
                order_id,
                expected = %stored.amount,
                reported = %notification.gross_amount,
                "Notification amount mismatch"
            );
            return Err(ReconcileError::AmountMismatch {
                expected: stored.amount,
                reported: notification.gross_amount.clone(),
            });
        }

        if transaction::transition(stored.status, to).is_err() {
            debug!(order_id, status = %stored.status, "Transaction already settled");
            return Ok(ReconcileOutcome::AlreadyProcessed {
                order_id: order_id.to_string(),
            });
        }
        let won = self
            .store
            .complete_transaction_if_pending(order_id, to, self.clock.now())
            .await?;
        if !won {
            debug!(order_id, "Concurrent delivery settled the transaction first");
            return Ok(ReconcileOutcome::AlreadyProcessed {
                order_id: order_id.to_string(),
            });
        }
        info!(order_id, status = %to, outcome = outcome.as_str(), "Transaction settled");

        let ticket = self
            .store
            .ticket(stored.ticket_id)
            .await?
            .ok_or(ReconcileError::TicketNotFound(stored.ticket_id))?;

        let ticket_status = match self.lifecycle.apply(&ticket, command).await {
            Ok(Applied::Transitioned(status)) => Some(status),
            Ok(Applied::Lost) => {
                warn!(order_id, ticket_id = %ticket.id, "Ticket moved before payment settled");
                None
            }
            Err(e) => {
                error!(
                    order_id,
                    ticket_id = %ticket.id,
                    ticket_status = %ticket.status,
                    error = %e,
                    "Payment settled for a ticket that is no longer pending"
                );
                return Err(e.into());
            }
        };

        Ok(ReconcileOutcome::Applied {
            order_id: order_id.to_string(),
            internal_status: to,
            ticket_status,
        })
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::attendance_code::AttendanceCode;
    use crate::mocks::{FixedClock, test_epoch};
    use crate::store::{InMemoryStore, TicketStore, TransactionStore};
    use crate::types::{
        EventId, EventSnapshot, Money, Ticket, TicketId, Transaction, TransactionId, UserId,
    };
    use chrono::Duration;

    const KEY: &str = "server-key";

    async fn seeded() -> (Arc<InMemoryStore>, Reconciler, Ticket, String) {
        let store = Arc::new(InMemoryStore::new());
        let event = EventSnapshot {
            id: EventId::new(),
            title: "Launch".to_string(),
            host_id: UserId::new(),
            capacity: 3,
            sold: 1,
            price: Money::from_cents(150_000),
            starts_at: test_epoch() + Duration::days(1),
        };
        let ticket = Ticket {
            id: TicketId::new(),
            user_id: UserId::new(),
            event_id: event.id,
            price_paid: event.price,
            attendance_code: AttendanceCode::generate(),
            status: TicketStatus::Pending,
            is_checked_in: false,
            checked_in_at: None,
            purchased_at: test_epoch(),
        };
        let order_id = format!("{}-1", ticket.id);
        store.insert_event(event).unwrap();
        store.insert_ticket(ticket.clone()).unwrap();
        store
            .insert_transaction(Transaction {
                id: TransactionId::new(),
                ticket_id: ticket.id,
                user_id: ticket.user_id,
                external_ref: order_id.clone(),
                amount: ticket.price_paid,
                status: TransactionStatus::Pending,
                payment_method: None,
                created_at: test_epoch(),
                completed_at: None,
            })
            .await
            .unwrap();
        let reconciler = Reconciler::new(store.clone(), Arc::new(FixedClock::new(test_epoch())), KEY);
        (store, reconciler, ticket, order_id)
    }

    #[tokio::test]
    async fn unknown_status_touches_nothing() {
        let (store, reconciler, ticket, order_id) = seeded().await;
        let n = PaymentNotification::signed(&order_id, "authorize", "1500.00", KEY);

        let outcome = reconciler.reconcile(&n).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::NoAction { .. }));
        let stored = store.ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Pending);
    }

    #[tokio::test]
    async fn settlement_activates_ticket() {
        let (store, reconciler, ticket, order_id) = seeded().await;
        let n = PaymentNotification::signed(&order_id, "settlement", "1500.00", KEY);

        let outcome = reconciler.reconcile(&n).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                order_id: order_id.clone(),
                internal_status: TransactionStatus::Success,
                ticket_status: Some(TicketStatus::Active),
            }
        );
        let tx = store.transaction_by_ref(&order_id).await.unwrap().unwrap();
        assert_eq!(tx.completed_at, Some(test_epoch()));
        assert_eq!(store.ticket(ticket.id).await.unwrap().unwrap().status, TicketStatus::Active);
    }

    #[tokio::test]
    async fn missing_transaction_is_reported() {
        let (_store, reconciler, _ticket, _order_id) = seeded().await;
        let n = PaymentNotification::signed("unknown-order", "settlement", "1500.00", KEY);
        let err = reconciler.reconcile(&n).await.unwrap_err();
        assert!(matches!(err, ReconcileError::TransactionNotFound(_)));
        assert!(!err.is_rejection());
    }
}
