//! Error taxonomy for the admission core.
//!
//! Business-rule and security rejections are distinct variants so the HTTP
//! layer can map them without string matching. A duplicate payment
//! notification is not an error at all; see
//! [`ReconcileOutcome::AlreadyProcessed`](crate::reconciler::ReconcileOutcome).

use crate::attendance_code::InvalidAttendanceCode;
use crate::gateway::GatewayError;
use crate::ledger::LedgerError;
use crate::machines::TransitionError;
use crate::types::{EventId, Money, TicketId, UserId};
use thiserror::Error;

/// Data-store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Driver or connection failure
    #[error("database error: {0}")]
    Database(String),
    /// Row the operation depends on is missing
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Identifier looked up
        id: String,
    },
    /// Unique constraint or similar conflict
    #[error("conflict: {0}")]
    Conflict(String),
    /// Row could not be mapped to a domain value
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                id: String::new(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

/// Why a purchase was refused.
#[derive(Debug, Error)]
pub enum PurchaseError {
    /// No such event
    #[error("event {0} not found")]
    EventNotFound(EventId),
    /// No such user
    #[error("user {0} not found")]
    UserNotFound(UserId),
    /// Capacity exhausted
    #[error("event {0} is sold out")]
    EventFull(EventId),
    /// User already holds a ticket for this event
    #[error("user {user_id} already holds a ticket for event {event_id}")]
    AlreadyPurchased {
        /// Buyer
        user_id: UserId,
        /// Event
        event_id: EventId,
    },
    /// No payment transaction carries the order id
    #[error("order {0} not found")]
    OrderNotFound(String),
    /// Caller does not own the order
    #[error("not permitted")]
    Unauthorized,
    /// Gateway refused or was unreachable; the reservation was rolled back
    #[error("payment gateway error: {0}")]
    Gateway(#[from] GatewayError),
    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LedgerError> for PurchaseError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::CapacityExhausted(exhausted) => Self::EventFull(exhausted.event_id),
            LedgerError::EventNotFound(event_id) => Self::EventNotFound(event_id),
            LedgerError::Store(store) => Self::Store(store),
        }
    }
}

/// Why a cancel, check-in or ticket lookup was refused.
#[derive(Debug, Error)]
pub enum TicketError {
    /// No such ticket
    #[error("ticket {0} not found")]
    TicketNotFound(TicketId),
    /// No such event
    #[error("event {0} not found")]
    EventNotFound(EventId),
    /// Caller does not own the ticket or host the event
    #[error("not permitted")]
    Unauthorized,
    /// Attendance code failed validation before lookup
    #[error(transparent)]
    InvalidAttendanceCode(#[from] InvalidAttendanceCode),
    /// No ticket at this event carries the code
    #[error("no ticket with that attendance code")]
    CodeNotFound,
    /// Ticket was already admitted
    #[error("ticket {0} is already checked in")]
    AlreadyCheckedIn(TicketId),
    /// Ticket is not usable
    #[error("ticket {0} is not active")]
    TicketNotActive(TicketId),
    /// Ticket is not active or has been used
    #[error("ticket {0} cannot be cancelled")]
    CannotCancel(TicketId),
    /// Event is underway or over
    #[error("event {0} has already started")]
    EventStarted(EventId),
    /// State machine refused the transition
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a payment notification was rejected or could not be applied.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Signature did not verify; nothing was read or written
    #[error("invalid notification signature")]
    InvalidSignature,
    /// Reported amount differs from the stored amount by more than the tolerance
    #[error("amount mismatch: expected {expected}, gateway reported {reported}")]
    AmountMismatch {
        /// Amount on record
        expected: Money,
        /// Amount in the notification
        reported: String,
    },
    /// No transaction carries the order id
    #[error("transaction {0} not found")]
    TransactionNotFound(String),
    /// Transaction points at a missing ticket
    #[error("ticket {0} not found")]
    TicketNotFound(TicketId),
    /// Transaction settled but its ticket had already left `pending`
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TicketError> for ReconcileError {
    fn from(err: TicketError) -> Self {
        match err {
            TicketError::Transition(transition) => Self::Transition(transition),
            TicketError::TicketNotFound(ticket_id) => Self::TicketNotFound(ticket_id),
            TicketError::Store(store) => Self::Store(store),
            other => Self::Store(StoreError::Corrupt(other.to_string())),
        }
    }
}

impl ReconcileError {
    /// Whether the sender should be told the notification was refused.
    ///
    /// Only signature failures are surfaced; everything after verification is
    /// acknowledged so the gateway stops redelivering.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::InvalidSignature)
    }
}
