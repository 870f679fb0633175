//! Capacity ledger: the `sold`/`capacity` pair per event.
//!
//! The arithmetic lives in [`Capacity`], a plain value with no I/O. The
//! [`CapacityLedger`] trait is the storage-side contract: a reservation runs
//! inside one unit of work holding an exclusive lock on the event row, so the
//! count can never exceed capacity no matter how many processes are reserving.

use crate::error::StoreError;
use crate::types::{EventId, Ticket, TicketDraft};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reservation refused: every unit of capacity is taken.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("event {event_id} is sold out ({sold}/{capacity})")]
pub struct CapacityExhausted {
    /// Event
    pub event_id: EventId,
    /// Maximum tickets
    pub capacity: u32,
    /// Tickets holding capacity when the reservation was attempted
    pub sold: u32,
}

/// Ledger failure.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No capacity left
    #[error(transparent)]
    CapacityExhausted(#[from] CapacityExhausted),
    /// Event row missing
    #[error("event {0} not found")]
    EventNotFound(EventId),
    /// Storage failure; the unit of work was rolled back
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Capacity counter for one event.
///
/// Invariant: `sold <= capacity` for every value produced by
/// [`try_reserve`](Self::try_reserve) and [`release`](Self::release).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    /// Maximum tickets
    pub capacity: u32,
    /// Tickets currently holding capacity
    pub sold: u32,
}

impl Capacity {
    /// Create a counter.
    #[must_use]
    pub const fn new(capacity: u32, sold: u32) -> Self {
        Self { capacity, sold }
    }

    /// Units still available.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.sold)
    }

    /// Take one unit.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExhausted`] when `sold >= capacity`; `self` is left
    /// unchanged.
    pub const fn try_reserve(self, event_id: EventId) -> Result<Self, CapacityExhausted> {
        if self.sold >= self.capacity {
            return Err(CapacityExhausted {
                event_id,
                capacity: self.capacity,
                sold: self.sold,
            });
        }
        Ok(Self {
            capacity: self.capacity,
            sold: self.sold + 1,
        })
    }

    /// Return one unit, floored at zero.
    #[must_use]
    pub const fn release(self) -> Self {
        Self {
            capacity: self.capacity,
            sold: self.sold.saturating_sub(1),
        }
    }
}

/// Storage-side capacity contract.
///
/// Implementations must enforce exclusivity in the data store, not in
/// process memory: correctness has to hold across server replicas.
pub trait CapacityLedger: Send + Sync {
    /// Reserve one unit of capacity and create the ticket in the same unit
    /// of work.
    ///
    /// Locks the event row, checks `sold < capacity`, inserts the ticket with
    /// a freshly drawn attendance code and increments `sold`, then commits.
    /// Attendance-code collisions are retried with a new code up to
    /// [`MAX_CODE_ATTEMPTS`](crate::attendance_code::MAX_CODE_ATTEMPTS) times.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::CapacityExhausted`] if the event is full; nothing is written
    /// - [`LedgerError::EventNotFound`] if the event row does not exist
    /// - [`LedgerError::Store`] on storage failure; nothing is written
    fn try_reserve(&self, draft: TicketDraft) -> BoxFuture<'_, Result<Ticket, LedgerError>>;

    /// Return one unit of capacity, floored at zero, as a single conditional
    /// update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn release(&self, event_id: EventId) -> BoxFuture<'_, Result<(), StoreError>>;
}
