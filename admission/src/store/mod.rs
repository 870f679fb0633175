//! Storage contracts consumed by the admission core.
//!
//! Every state change that must happen at most once is a conditional write:
//! "update only if the row is still in the expected prior state", reporting
//! whether it applied. Idempotency is anchored to durable rows, never to an
//! in-process cache, because notifications may land on any replica.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use crate::attendance_code::AttendanceCode;
use crate::error::StoreError;
use crate::ledger::CapacityLedger;
use crate::types::{
    EventId, EventSnapshot, Ticket, TicketId, TicketStatus, Transaction, TransactionStatus,
    UserId, UserProfile,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// Result alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Ticket rows.
pub trait TicketStore: Send + Sync {
    /// Fetch a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn ticket(&self, id: TicketId) -> BoxFuture<'_, StoreResult<Option<Ticket>>>;

    /// Find the ticket at `event_id` carrying `code`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn ticket_by_code(
        &self,
        event_id: EventId,
        code: &AttendanceCode,
    ) -> BoxFuture<'_, StoreResult<Option<Ticket>>>;

    /// A `pending` or `active` ticket held by `user_id` for `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn holding_ticket(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> BoxFuture<'_, StoreResult<Option<Ticket>>>;

    /// Physically delete a ticket. Used only to roll back a purchase whose
    /// payment was never attempted successfully.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn delete_ticket(&self, id: TicketId) -> BoxFuture<'_, StoreResult<()>>;

    /// Move a ticket from `from` to `to` if it is still in `from`.
    ///
    /// Returns `false` when another writer got there first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn transition_ticket(
        &self,
        id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
    ) -> BoxFuture<'_, StoreResult<bool>>;

    /// Set the check-in flag if the ticket is `active` and not yet checked in.
    ///
    /// Returns `false` if either condition no longer holds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn mark_checked_in(&self, id: TicketId, at: DateTime<Utc>) -> BoxFuture<'_, StoreResult<bool>>;

    /// Move every `pending` ticket purchased before `cutoff` to `expired` in
    /// one atomic statement, returning the affected tickets.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn expire_pending(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, StoreResult<Vec<Ticket>>>;
}

/// Payment transaction rows.
pub trait TransactionStore: Send + Sync {
    /// Insert a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the external reference is taken,
    /// or another [`StoreError`] on storage failure.
    fn insert_transaction(&self, transaction: Transaction) -> BoxFuture<'_, StoreResult<()>>;

    /// Fetch the payment transaction for a gateway order id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn transaction_by_ref(
        &self,
        external_ref: &str,
    ) -> BoxFuture<'_, StoreResult<Option<Transaction>>>;

    /// The idempotency guard: write `to` (and `completed_at`) only if the
    /// transaction is still `pending`.
    ///
    /// Returns `false` when an earlier delivery already moved it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn complete_transaction_if_pending(
        &self,
        external_ref: &str,
        to: TransactionStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<bool>>;
}

/// Attendee registrations and attendance counters.
pub trait AttendeeStore: Send + Sync {
    /// Register `user_id` as a confirmed attendee. Registering twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn register_attendee(&self, event_id: EventId, user_id: UserId)
    -> BoxFuture<'_, StoreResult<()>>;

    /// Remove any registration. Removing a missing registration is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn remove_attendee(&self, event_id: EventId, user_id: UserId) -> BoxFuture<'_, StoreResult<()>>;

    /// Whether `user_id` is a confirmed attendee.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn is_attendee(&self, event_id: EventId, user_id: UserId) -> BoxFuture<'_, StoreResult<bool>>;

    /// Bump the user's attended-events counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn increment_attendance(&self, user_id: UserId) -> BoxFuture<'_, StoreResult<()>>;
}

/// Read-only lookups owned by surrounding services.
pub trait DirectoryStore: Send + Sync {
    /// Event snapshot including the live capacity counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn event(&self, id: EventId) -> BoxFuture<'_, StoreResult<Option<EventSnapshot>>>;

    /// User profile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn user(&self, id: UserId) -> BoxFuture<'_, StoreResult<Option<UserProfile>>>;

    /// Connectivity check for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unreachable.
    fn ping(&self) -> BoxFuture<'_, StoreResult<()>>;
}

/// Everything the admission services need from storage.
pub trait AdmissionStore:
    CapacityLedger + TicketStore + TransactionStore + AttendeeStore + DirectoryStore
{
}

impl<T> AdmissionStore for T where
    T: CapacityLedger + TicketStore + TransactionStore + AttendeeStore + DirectoryStore
{
}
