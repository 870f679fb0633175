//! In-memory store for development and tests.
//!
//! Tables sit behind one mutex with short, non-async critical sections, so
//! every conditional write is a compare-then-set that cannot interleave.
//! Event rows additionally get their own async lock, held across the whole
//! reservation, to stand in for `SELECT ... FOR UPDATE`: concurrent
//! reservers for one event queue on it, reservers for different events never
//! meet.

use super::{AttendeeStore, DirectoryStore, StoreResult, TicketStore, TransactionStore};
use crate::attendance_code::{AttendanceCode, MAX_CODE_ATTEMPTS};
use crate::error::StoreError;
use crate::ledger::{Capacity, CapacityLedger, LedgerError};
use crate::types::{
    EventId, EventSnapshot, Ticket, TicketDraft, TicketId, TicketStatus, Transaction,
    TransactionStatus, UserId, UserProfile,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    events: HashMap<EventId, EventSnapshot>,
    users: HashMap<UserId, UserProfile>,
    tickets: HashMap<TicketId, Ticket>,
    transactions: HashMap<String, Transaction>,
    attendees: HashSet<(EventId, UserId)>,
}

impl Tables {
    fn code_taken(&self, code: &AttendanceCode) -> bool {
        self.tickets.values().any(|t| &t.attendance_code == code)
    }
}

/// In-memory implementation of every storage trait.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    event_locks: Mutex<HashMap<EventId, Arc<tokio::sync::Mutex<()>>>>,
    fail_transaction_inserts: AtomicBool,
    fail_releases: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("in-memory tables poisoned".to_string()))
    }

    fn event_lock(&self, event_id: EventId) -> StoreResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .event_locks
            .lock()
            .map_err(|_| StoreError::Database("in-memory lock table poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(event_id).or_default()))
    }

    /// Seed or replace an event row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is poisoned.
    pub fn insert_event(&self, event: EventSnapshot) -> StoreResult<()> {
        self.tables()?.events.insert(event.id, event);
        Ok(())
    }

    /// Seed or replace a user row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is poisoned.
    pub fn insert_user(&self, user: UserProfile) -> StoreResult<()> {
        self.tables()?.users.insert(user.id, user);
        Ok(())
    }

    /// Seed a ticket directly, bypassing the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is poisoned.
    pub fn insert_ticket(&self, ticket: Ticket) -> StoreResult<()> {
        self.tables()?.tickets.insert(ticket.id, ticket);
        Ok(())
    }

    /// Current capacity counter for an event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is poisoned.
    pub fn capacity(&self, event_id: EventId) -> StoreResult<Option<Capacity>> {
        Ok(self
            .tables()?
            .events
            .get(&event_id)
            .map(|e| Capacity::new(e.capacity, e.sold)))
    }

    /// All tickets for an event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is poisoned.
    pub fn tickets_for_event(&self, event_id: EventId) -> StoreResult<Vec<Ticket>> {
        Ok(self
            .tables()?
            .tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect())
    }

    /// All transactions recorded for a ticket, payment and refund alike.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is poisoned.
    pub fn transactions_for_ticket(&self, ticket_id: TicketId) -> StoreResult<Vec<Transaction>> {
        Ok(self
            .tables()?
            .transactions
            .values()
            .filter(|t| t.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    /// Fault injection: make every transaction insert fail.
    pub fn fail_transaction_inserts(&self, fail: bool) {
        self.fail_transaction_inserts.store(fail, Ordering::SeqCst);
    }

    /// Fault injection: make every capacity release fail.
    pub fn fail_releases(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::SeqCst);
    }
}

impl CapacityLedger for InMemoryStore {
    fn try_reserve(&self, draft: TicketDraft) -> BoxFuture<'_, Result<Ticket, LedgerError>> {
        Box::pin(async move {
            let event_id = draft.event_id;
            let row_lock = self.event_lock(event_id)?;
            let _row = row_lock.lock().await;

            let counter = {
                let tables = self.tables()?;
                let event = tables
                    .events
                    .get(&event_id)
                    .ok_or(LedgerError::EventNotFound(event_id))?;
                Capacity::new(event.capacity, event.sold)
            };
            let reserved = counter.try_reserve(event_id)?;

            // Give other reservers a chance to run; only the row lock keeps them out.
            tokio::task::yield_now().await;

            let mut tables = self.tables()?;
            for _ in 0..MAX_CODE_ATTEMPTS {
                let code = AttendanceCode::generate();
                if tables.code_taken(&code) {
                    continue;
                }
                let ticket = draft.into_ticket(code);
                tables.tickets.insert(ticket.id, ticket.clone());
                if let Some(event) = tables.events.get_mut(&event_id) {
                    event.sold = reserved.sold;
                }
                return Ok(ticket);
            }
            Err(LedgerError::Store(StoreError::Conflict(format!(
                "no unique attendance code after {MAX_CODE_ATTEMPTS} attempts"
            ))))
        })
    }

    fn release(&self, event_id: EventId) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if self.fail_releases.load(Ordering::SeqCst) {
                return Err(StoreError::Database("injected release failure".to_string()));
            }
            // Queue behind any reservation in flight, as the row lock would.
            let row_lock = self.event_lock(event_id)?;
            let _row = row_lock.lock().await;
            let mut tables = self.tables()?;
            let event = tables
                .events
                .get_mut(&event_id)
                .ok_or_else(|| StoreError::not_found("event", event_id))?;
            event.sold = Capacity::new(event.capacity, event.sold).release().sold;
            Ok(())
        })
    }
}

impl TicketStore for InMemoryStore {
    fn ticket(&self, id: TicketId) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move { Ok(self.tables()?.tickets.get(&id).cloned()) })
    }

    fn ticket_by_code(
        &self,
        event_id: EventId,
        code: &AttendanceCode,
    ) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        let code = code.clone();
        Box::pin(async move {
            Ok(self
                .tables()?
                .tickets
                .values()
                .find(|t| t.event_id == event_id && t.attendance_code == code)
                .cloned())
        })
    }

    fn holding_ticket(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> BoxFuture<'_, StoreResult<Option<Ticket>>> {
        Box::pin(async move {
            Ok(self
                .tables()?
                .tickets
                .values()
                .find(|t| {
                    t.user_id == user_id && t.event_id == event_id && t.status.holds_capacity()
                })
                .cloned())
        })
    }

    fn delete_ticket(&self, id: TicketId) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.tables()?.tickets.remove(&id);
            Ok(())
        })
    }

    fn transition_ticket(
        &self,
        id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let mut tables = self.tables()?;
            match tables.tickets.get_mut(&id) {
                Some(ticket) if ticket.status == from => {
                    ticket.status = to;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn mark_checked_in(&self, id: TicketId, at: DateTime<Utc>) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let mut tables = self.tables()?;
            match tables.tickets.get_mut(&id) {
                Some(ticket) if ticket.status == TicketStatus::Active && !ticket.is_checked_in => {
                    ticket.is_checked_in = true;
                    ticket.checked_in_at = Some(at);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn expire_pending(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, StoreResult<Vec<Ticket>>> {
        Box::pin(async move {
            let mut tables = self.tables()?;
            let mut expired = Vec::new();
            for ticket in tables.tickets.values_mut() {
                if ticket.status == TicketStatus::Pending && ticket.purchased_at < cutoff {
                    ticket.status = TicketStatus::Expired;
                    expired.push(ticket.clone());
                }
            }
            Ok(expired)
        })
    }
}

impl TransactionStore for InMemoryStore {
    fn insert_transaction(&self, transaction: Transaction) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            if self.fail_transaction_inserts.load(Ordering::SeqCst) {
                return Err(StoreError::Database(
                    "injected transaction insert failure".to_string(),
                ));
            }
            let mut tables = self.tables()?;
            if tables.transactions.contains_key(&transaction.external_ref) {
                return Err(StoreError::Conflict(format!(
                    "external reference {} already recorded",
                    transaction.external_ref
                )));
            }
            tables
                .transactions
                .insert(transaction.external_ref.clone(), transaction);
            Ok(())
        })
    }

    fn transaction_by_ref(
        &self,
        external_ref: &str,
    ) -> BoxFuture<'_, StoreResult<Option<Transaction>>> {
        let external_ref = external_ref.to_owned();
        Box::pin(async move { Ok(self.tables()?.transactions.get(&external_ref).cloned()) })
    }

    fn complete_transaction_if_pending(
        &self,
        external_ref: &str,
        to: TransactionStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        let external_ref = external_ref.to_owned();
        Box::pin(async move {
            let mut tables = self.tables()?;
            match tables.transactions.get_mut(&external_ref) {
                Some(tx) if tx.status == TransactionStatus::Pending => {
                    tx.status = to;
                    if matches!(to, TransactionStatus::Success | TransactionStatus::Refunded) {
                        tx.completed_at = Some(at);
                    }
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}

impl AttendeeStore for InMemoryStore {
    fn register_attendee(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.tables()?.attendees.insert((event_id, user_id));
            Ok(())
        })
    }

    fn remove_attendee(&self, event_id: EventId, user_id: UserId) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.tables()?.attendees.remove(&(event_id, user_id));
            Ok(())
        })
    }

    fn is_attendee(&self, event_id: EventId, user_id: UserId) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move { Ok(self.tables()?.attendees.contains(&(event_id, user_id))) })
    }

    fn increment_attendance(&self, user_id: UserId) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut tables = self.tables()?;
            let user = tables
                .users
                .get_mut(&user_id)
                .ok_or_else(|| StoreError::not_found("user", user_id))?;
            user.events_attended = user.events_attended.saturating_add(1);
            Ok(())
        })
    }
}

impl DirectoryStore for InMemoryStore {
    fn event(&self, id: EventId) -> BoxFuture<'_, StoreResult<Option<EventSnapshot>>> {
        Box::pin(async move { Ok(self.tables()?.events.get(&id).cloned()) })
    }

    fn user(&self, id: UserId) -> BoxFuture<'_, StoreResult<Option<UserProfile>>> {
        Box::pin(async move { Ok(self.tables()?.users.get(&id).cloned()) })
    }

    fn ping(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move { self.tables().map(|_| ()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::test_epoch;
    use crate::types::Money;
    use chrono::Duration;

    fn event(capacity: u32) -> EventSnapshot {
        EventSnapshot {
            id: EventId::new(),
            title: "Rust Meetup".to_string(),
            host_id: UserId::new(),
            capacity,
            sold: 0,
            price: Money::ZERO,
            starts_at: test_epoch() + Duration::days(7),
        }
    }

    fn draft(event_id: EventId, status: TicketStatus) -> TicketDraft {
        TicketDraft {
            id: TicketId::new(),
            user_id: UserId::new(),
            event_id,
            price_paid: Money::ZERO,
            status,
            purchased_at: test_epoch(),
        }
    }

    #[tokio::test]
    async fn reserve_increments_and_refuses_when_full() {
        let store = InMemoryStore::new();
        let event = event(1);
        let event_id = event.id;
        store.insert_event(event).unwrap();

        let ticket = store
            .try_reserve(draft(event_id, TicketStatus::Active))
            .await
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Active);
        assert_eq!(store.capacity(event_id).unwrap().unwrap().sold, 1);

        let err = store
            .try_reserve(draft(event_id, TicketStatus::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CapacityExhausted(_)));
        assert_eq!(store.tickets_for_event(event_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reserve_unknown_event() {
        let store = InMemoryStore::new();
        let err = store
            .try_reserve(draft(EventId::new(), TicketStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn release_floors_at_zero() {
        let store = InMemoryStore::new();
        let event = event(3);
        let event_id = event.id;
        store.insert_event(event).unwrap();

        store.release(event_id).await.unwrap();
        assert_eq!(store.capacity(event_id).unwrap().unwrap().sold, 0);
    }

    #[tokio::test]
    async fn transition_is_conditional() {
        let store = InMemoryStore::new();
        let event = event(3);
        let event_id = event.id;
        store.insert_event(event).unwrap();
        let ticket = store
            .try_reserve(draft(event_id, TicketStatus::Pending))
            .await
            .unwrap();

        assert!(store
            .transition_ticket(ticket.id, TicketStatus::Pending, TicketStatus::Active)
            .await
            .unwrap());
        assert!(!store
            .transition_ticket(ticket.id, TicketStatus::Pending, TicketStatus::Cancelled)
            .await
            .unwrap());
        let stored = store.ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Active);
    }

    #[tokio::test]
    async fn expire_pending_only_touches_old_pending() {
        let store = InMemoryStore::new();
        let event = event(3);
        let event_id = event.id;
        store.insert_event(event).unwrap();
        let pending = store
            .try_reserve(draft(event_id, TicketStatus::Pending))
            .await
            .unwrap();
        let active = store
            .try_reserve(draft(event_id, TicketStatus::Active))
            .await
            .unwrap();

        let expired = store
            .expire_pending(test_epoch() + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, pending.id);
        assert_eq!(expired[0].status, TicketStatus::Expired);
        let active = store.ticket(active.id).await.unwrap().unwrap();
        assert_eq!(active.status, TicketStatus::Active);

        // Already expired rows are not returned again.
        assert!(store
            .expire_pending(test_epoch() + Duration::hours(3))
            .await
            .unwrap()
            .is_empty());
    }
}
