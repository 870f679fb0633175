//! Purchase orchestrator.
//!
//! Composes the capacity ledger, the ticket lifecycle and the payment
//! gateway into one user-visible purchase:
//!
//! 1. Fast-path checks (event, buyer, sold-out, duplicate). These only save
//!    a round trip; the ledger is the real guard.
//! 2. Reserve capacity and create the ticket in one unit of work.
//! 3. Free events: run the activation effects and hand back a credential.
//! 4. Priced events: open a payment session and record a `pending`
//!    transaction. Each forward step registers its undo action in a
//!    [`Rollback`], which runs in reverse if a later step fails.

use crate::clock::Clock;
use crate::compensation::{Compensation, Rollback};
use crate::credential::TicketCredential;
use crate::error::PurchaseError;
use crate::gateway::{
    ChargeRequest, Customer, LineItem, PaymentGateway, PaymentSession, StatusSnapshot,
    order_id_for,
};
use crate::lifecycle::TicketLifecycle;
use crate::machines::ticket::issued_active_effects;
use crate::store::AdmissionStore;
use crate::types::{
    EventId, EventSnapshot, Ticket, TicketDraft, TicketId, TicketStatus, Transaction,
    TransactionId, TransactionStatus, UserId, UserProfile,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    /// Buyer
    pub user_id: UserId,
    /// Event
    pub event_id: EventId,
    /// Restrict checkout to one payment method
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// What the buyer gets back.
///
/// Priced purchases carry `payment` and `order_id`; free ones carry
/// `qr_payload`. Never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseReceipt {
    /// The created ticket
    pub ticket: Ticket,
    /// Session to complete payment with
    pub payment: Option<PaymentSession>,
    /// Gateway order id for status queries
    pub order_id: Option<String>,
    /// Scannable credential for an already-active ticket
    pub qr_payload: Option<String>,
}

/// Owner view of a payment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentStatus {
    /// Stored transaction
    pub transaction: Transaction,
    /// Gateway's view, when it could be fetched
    pub gateway: Option<StatusSnapshot>,
}

/// Runs purchases.
#[derive(Clone)]
pub struct PurchaseService {
    store: Arc<dyn AdmissionStore>,
    gateway: Arc<dyn PaymentGateway>,
    lifecycle: TicketLifecycle,
    clock: Arc<dyn Clock>,
}

impl PurchaseService {
    /// Create a purchase service.
    #[must_use]
    pub fn new(
        store: Arc<dyn AdmissionStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let lifecycle = TicketLifecycle::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            gateway,
            lifecycle,
            clock,
        }
    }

    /// Buy one ticket.
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::EventNotFound`] / [`PurchaseError::UserNotFound`]
    /// - [`PurchaseError::EventFull`] when capacity is exhausted
    /// - [`PurchaseError::AlreadyPurchased`] when the buyer holds a ticket
    /// - [`PurchaseError::Gateway`] / [`PurchaseError::Store`] after the
    ///   reservation has been rolled back
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<PurchaseReceipt, PurchaseError> {
        let result = self.run(request).await;
        metrics::counter!("admission_purchases_total", "outcome" => outcome_label(&result))
            .increment(1);
        result
    }

    async fn run(&self, request: PurchaseRequest) -> Result<PurchaseReceipt, PurchaseError> {
        let PurchaseRequest {
            user_id,
            event_id,
            payment_method,
        } = request;

        let event = self
            .store
            .event(event_id)
            .await?
            .ok_or(PurchaseError::EventNotFound(event_id))?;
        let buyer = self
            .store
            .user(user_id)
            .await?
            .ok_or(PurchaseError::UserNotFound(user_id))?;
        if event.is_full() {
            debug!(event_id = %event_id, sold = event.sold, "Sold out on fast path");
            return Err(PurchaseError::EventFull(event_id));
        }
        if self.store.holding_ticket(user_id, event_id).await?.is_some() {
            return Err(PurchaseError::AlreadyPurchased { user_id, event_id });
        }

        let status = if event.is_free() {
            TicketStatus::Active
        } else {
            TicketStatus::Pending
        };
        let ticket = self
            .store
            .try_reserve(TicketDraft {
                id: TicketId::new(),
                user_id,
                event_id,
                price_paid: event.price,
                status,
                purchased_at: self.clock.now(),
            })
            .await?;
        info!(
            ticket_id = %ticket.id,
            event_id = %event_id,
            user_id = %user_id,
            status = %ticket.status,
            "Capacity reserved"
        );

        if event.is_free() {
            Ok(self.finish_free(ticket).await)
        } else {
            self.start_payment(ticket, &event, buyer, payment_method).await
        }
    }

    async fn finish_free(&self, ticket: Ticket) -> PurchaseReceipt {
        self.lifecycle
            .run_effects(&ticket, &issued_active_effects())
            .await;

        let qr_payload = match TicketCredential::issue(&ticket).and_then(|c| c.to_qr_payload()) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(ticket_id = %ticket.id, error = %e, "Credential could not be issued");
                None
            }
        };
        PurchaseReceipt {
            ticket,
            payment: None,
            order_id: None,
            qr_payload,
        }
    }

    async fn start_payment(
        &self,
        ticket: Ticket,
        event: &EventSnapshot,
        buyer: UserProfile,
        payment_method: Option<String>,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        let mut rollback = Rollback::new();
        rollback.push(Compensation::ReleaseCapacity(ticket.event_id));
        rollback.push(Compensation::DeleteTicket(ticket.id));

        let now = self.clock.now();
        let order_id = order_id_for(ticket.id, now);
        let charge = ChargeRequest {
            order_id: order_id.clone(),
            amount: ticket.price_paid,
            customer: Customer {
                name: buyer.name,
                email: buyer.email,
            },
            item: LineItem {
                id: event.id.to_string(),
                name: event.title.clone(),
                price: event.price,
                quantity: 1,
            },
            payment_method: payment_method.clone(),
        };

        let session = match self.gateway.create_payment(charge).await {
            Ok(session) => session,
            Err(e) => {
                warn!(ticket_id = %ticket.id, order_id = %order_id, error = %e, "Payment session failed");
                self.roll_back(rollback, &ticket, "gateway_failure").await;
                return Err(e.into());
            }
        };

        let transaction = Transaction {
            id: TransactionId::new(),
            ticket_id: ticket.id,
            user_id: ticket.user_id,
            external_ref: order_id.clone(),
            amount: ticket.price_paid,
            status: TransactionStatus::Pending,
            payment_method,
            created_at: now,
            completed_at: None,
        };
        if let Err(e) = self.store.insert_transaction(transaction).await {
            warn!(ticket_id = %ticket.id, order_id = %order_id, error = %e, "Transaction not recorded");
            self.roll_back(rollback, &ticket, "transaction_persist_failure").await;
            return Err(e.into());
        }

        info!(ticket_id = %ticket.id, order_id = %order_id, amount = %ticket.price_paid, "Payment pending");
        Ok(PurchaseReceipt {
            ticket,
            payment: Some(session),
            order_id: Some(order_id),
            qr_payload: None,
        })
    }

    async fn roll_back(&self, rollback: Rollback, ticket: &Ticket, reason: &str) {
        let report = rollback.execute(self.store.as_ref(), reason).await;
        if report.leaked_capacity() {
            error!(
                ticket_id = %ticket.id,
                event_id = %ticket.event_id,
                reason,
                "Reserved capacity could not be released"
            );
        }
    }

    /// Payment status for the buyer who owns `order_id`.
    ///
    /// A gateway error is logged and reported as `gateway: None`; the
    /// stored transaction is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`PurchaseError::OrderNotFound`] for an unknown order and
    /// [`PurchaseError::Unauthorized`] when `user_id` is not the payer.
    pub async fn payment_status(
        &self,
        user_id: UserId,
        order_id: &str,
    ) -> Result<PaymentStatus, PurchaseError> {
        let transaction = self
            .store
            .transaction_by_ref(order_id)
            .await?
            .ok_or_else(|| PurchaseError::OrderNotFound(order_id.to_string()))?;
        if transaction.user_id != user_id {
            return Err(PurchaseError::Unauthorized);
        }

        let gateway = match self.gateway.transaction_status(order_id).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(order_id, error = %e, "Gateway status unavailable");
                None
            }
        };
        Ok(PaymentStatus {
            transaction,
            gateway,
        })
    }
}

impl std::fmt::Debug for PurchaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurchaseService").finish_non_exhaustive()
    }
}

fn outcome_label(result: &Result<PurchaseReceipt, PurchaseError>) -> &'static str {
    match result {
        Ok(receipt) if receipt.payment.is_some() => "pending_payment",
        Ok(_) => "issued",
        Err(PurchaseError::EventFull(_)) => "sold_out",
        Err(PurchaseError::AlreadyPurchased { .. }) => "already_purchased",
        Err(PurchaseError::Gateway(_)) => "gateway_failed",
        Err(PurchaseError::Store(_)) => "store_failed",
        Err(_) => "rejected",
    }
}
