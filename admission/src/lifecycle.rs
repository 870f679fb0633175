//! Ticket lifecycle service.
//!
//! Applies [`TicketCommand`]s through the conditional write that guards each
//! transition, then runs the effects the state machine returned. Effects run
//! only when this caller's write won, so a racing duplicate never doubles
//! them. Also hosts the holder and door-staff operations: cancel, check-in,
//! credential retrieval and verification.

use crate::attendance_code::AttendanceCode;
use crate::clock::Clock;
use crate::credential::TicketCredential;
use crate::error::TicketError;
use crate::machines::ticket::{self, CheckInRejection, TicketCommand, TicketEffect};
use crate::store::AdmissionStore;
use crate::types::{
    EventId, Ticket, TicketId, TicketStatus, Transaction, TransactionId, TransactionStatus,
    UserId,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`TicketLifecycle::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// This caller moved the ticket and ran the effects
    Transitioned(TicketStatus),
    /// Another writer moved the ticket first; nothing was done
    Lost,
}

/// Ticket state changes and the operations built on them.
#[derive(Clone)]
pub struct TicketLifecycle {
    store: Arc<dyn AdmissionStore>,
    clock: Arc<dyn Clock>,
}

impl TicketLifecycle {
    /// Create a lifecycle service.
    #[must_use]
    pub fn new(store: Arc<dyn AdmissionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Drive `ticket` through `command`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Transition`] if the command is invalid from the
    /// ticket's current status, or [`TicketError::Store`] if the write fails.
    pub async fn apply(
        &self,
        ticket: &Ticket,
        command: TicketCommand,
    ) -> Result<Applied, TicketError> {
        let transition = ticket::transition(ticket.status, command)?;
        let won = self
            .store
            .transition_ticket(ticket.id, transition.from, transition.to)
            .await?;
        if !won {
            debug!(
                ticket_id = %ticket.id,
                command = command.as_str(),
                "Ticket already moved by another writer"
            );
            return Ok(Applied::Lost);
        }

        info!(
            ticket_id = %ticket.id,
            event_id = %ticket.event_id,
            from = %transition.from,
            to = %transition.to,
            "Ticket transitioned"
        );
        self.run_effects(ticket, &transition.effects).await;
        Ok(Applied::Transitioned(transition.to))
    }

    /// Run committed effects for `ticket`.
    ///
    /// Each effect is attempted independently; failures are logged and do
    /// not undo the transition that produced them.
    pub async fn run_effects(&self, ticket: &Ticket, effects: &[TicketEffect]) {
        for effect in effects {
            let result = match effect {
                TicketEffect::RegisterAttendee => {
                    self.store
                        .register_attendee(ticket.event_id, ticket.user_id)
                        .await
                }
                TicketEffect::IncrementAttendance => {
                    self.store.increment_attendance(ticket.user_id).await
                }
                TicketEffect::ReleaseCapacity => {
                    let released = self.store.release(ticket.event_id).await;
                    if released.is_ok() {
                        metrics::counter!("admission_capacity_released_total").increment(1);
                    }
                    released
                }
                TicketEffect::RemoveAttendee => {
                    self.store
                        .remove_attendee(ticket.event_id, ticket.user_id)
                        .await
                }
                TicketEffect::RecordRefund => {
                    self.store.insert_transaction(self.refund_record(ticket)).await
                }
            };
            if let Err(e) = result {
                warn!(
                    ticket_id = %ticket.id,
                    event_id = %ticket.event_id,
                    effect = ?effect,
                    error = %e,
                    "Ticket effect failed"
                );
            }
        }
    }

    fn refund_record(&self, ticket: &Ticket) -> Transaction {
        let now = self.clock.now();
        Transaction {
            id: TransactionId::new(),
            ticket_id: ticket.id,
            user_id: ticket.user_id,
            external_ref: format!("refund-{}", uuid::Uuid::new_v4()),
            amount: ticket.price_paid,
            status: TransactionStatus::Refunded,
            payment_method: None,
            created_at: now,
            completed_at: Some(now),
        }
    }

    /// Holder cancels an active ticket before the event starts.
    ///
    /// Paid tickets end `refunded` with a refund record; free ones end
    /// `cancelled`. Returns the ticket as stored afterwards.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketNotFound`] / [`TicketError::EventNotFound`]
    /// - [`TicketError::Unauthorized`] if `user_id` does not own the ticket
    /// - [`TicketError::CannotCancel`] unless active and not checked in, or if
    ///   a concurrent writer moved it first
    /// - [`TicketError::EventStarted`] once the event has begun
    pub async fn cancel(&self, user_id: UserId, ticket_id: TicketId) -> Result<Ticket, TicketError> {
        let ticket = self.owned_ticket(user_id, ticket_id).await?;
        if !ticket.can_be_cancelled() {
            return Err(TicketError::CannotCancel(ticket_id));
        }

        let event = self
            .store
            .event(ticket.event_id)
            .await?
            .ok_or(TicketError::EventNotFound(ticket.event_id))?;
        if event.has_started(self.clock.now()) {
            return Err(TicketError::EventStarted(event.id));
        }

        let command = TicketCommand::Cancel {
            paid: ticket.is_paid(),
        };
        match self.apply(&ticket, command).await? {
            Applied::Transitioned(_) => {}
            Applied::Lost => return Err(TicketError::CannotCancel(ticket_id)),
        }

        self.store
            .ticket(ticket_id)
            .await?
            .ok_or(TicketError::TicketNotFound(ticket_id))
    }

    /// Door staff admit the holder of `code` to `event_id`.
    ///
    /// Only the event's host may check tickets in. The flag flips exactly
    /// once; a second scan is rejected without touching state.
    ///
    /// # Errors
    ///
    /// - [`TicketError::InvalidAttendanceCode`] before any lookup
    /// - [`TicketError::EventNotFound`] / [`TicketError::CodeNotFound`]
    /// - [`TicketError::Unauthorized`] if `host_id` does not host the event
    /// - [`TicketError::AlreadyCheckedIn`] / [`TicketError::TicketNotActive`]
    pub async fn check_in(
        &self,
        host_id: UserId,
        event_id: EventId,
        code: &str,
    ) -> Result<Ticket, TicketError> {
        let code = AttendanceCode::parse(code)?;

        let event = self
            .store
            .event(event_id)
            .await?
            .ok_or(TicketError::EventNotFound(event_id))?;
        if event.host_id != host_id {
            return Err(TicketError::Unauthorized);
        }

        let ticket = self
            .store
            .ticket_by_code(event_id, &code)
            .await?
            .ok_or(TicketError::CodeNotFound)?;
        if ticket.event_id != event_id {
            return Err(TicketError::CodeNotFound);
        }

        ticket::check_in(ticket.status, ticket.is_checked_in).map_err(|rejection| {
            match rejection {
                CheckInRejection::AlreadyCheckedIn => TicketError::AlreadyCheckedIn(ticket.id),
                CheckInRejection::NotActive => TicketError::TicketNotActive(ticket.id),
            }
        })?;

        let now = self.clock.now();
        if !self.store.mark_checked_in(ticket.id, now).await? {
            // Re-read to report why the guard refused.
            let current = self
                .store
                .ticket(ticket.id)
                .await?
                .ok_or(TicketError::TicketNotFound(ticket.id))?;
            return Err(if current.is_checked_in {
                TicketError::AlreadyCheckedIn(ticket.id)
            } else {
                TicketError::TicketNotActive(ticket.id)
            });
        }

        metrics::counter!("admission_check_ins_total").increment(1);
        info!(ticket_id = %ticket.id, event_id = %event_id, "Ticket checked in");

        self.store
            .ticket(ticket.id)
            .await?
            .ok_or(TicketError::TicketNotFound(ticket.id))
    }

    /// Scannable credential for the holder's active ticket.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketNotFound`] / [`TicketError::Unauthorized`]
    /// - [`TicketError::TicketNotActive`] until payment has settled
    pub async fn credential(
        &self,
        user_id: UserId,
        ticket_id: TicketId,
    ) -> Result<TicketCredential, TicketError> {
        let ticket = self.owned_ticket(user_id, ticket_id).await?;
        TicketCredential::issue(&ticket).map_err(|_| TicketError::TicketNotActive(ticket_id))
    }

    /// Whether `ticket_id` currently admits its holder to `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::TicketNotFound`] for an unknown ticket.
    pub async fn verify(&self, ticket_id: TicketId, event_id: EventId) -> Result<bool, TicketError> {
        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or(TicketError::TicketNotFound(ticket_id))?;
        Ok(ticket.is_valid_for(event_id))
    }

    async fn owned_ticket(&self, user_id: UserId, ticket_id: TicketId) -> Result<Ticket, TicketError> {
        let ticket = self
            .store
            .ticket(ticket_id)
            .await?
            .ok_or(TicketError::TicketNotFound(ticket_id))?;
        if ticket.user_id != user_id {
            return Err(TicketError::Unauthorized);
        }
        Ok(ticket)
    }
}

impl std::fmt::Debug for TicketLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketLifecycle").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{FixedClock, test_epoch};
    use crate::store::{InMemoryStore, TicketStore};
    use crate::types::{EventSnapshot, Money, TicketStatus};
    use chrono::Duration;

    fn setup(price: Money) -> (Arc<InMemoryStore>, TicketLifecycle, Ticket) {
        let store = Arc::new(InMemoryStore::new());
        let event = EventSnapshot {
            id: EventId::new(),
            title: "Rust Meetup".to_string(),
            host_id: UserId::new(),
            capacity: 5,
            sold: 1,
            price,
            starts_at: test_epoch() + Duration::days(2),
        };
        let ticket = Ticket {
            id: TicketId::new(),
            user_id: UserId::new(),
            event_id: event.id,
            price_paid: price,
            attendance_code: AttendanceCode::generate(),
            status: TicketStatus::Pending,
            is_checked_in: false,
            checked_in_at: None,
            purchased_at: test_epoch(),
        };
        store.insert_event(event).unwrap();
        store.insert_ticket(ticket.clone()).unwrap();
        let lifecycle = TicketLifecycle::new(store.clone(), Arc::new(FixedClock::new(test_epoch())));
        (store, lifecycle, ticket)
    }

    #[tokio::test]
    async fn second_writer_loses_and_runs_no_effects() {
        let (store, lifecycle, ticket) = setup(Money::from_cents(1_000));

        let first = lifecycle.apply(&ticket, TicketCommand::FailPayment).await.unwrap();
        let second = lifecycle.apply(&ticket, TicketCommand::FailPayment).await.unwrap();

        assert_eq!(first, Applied::Transitioned(TicketStatus::Cancelled));
        assert_eq!(second, Applied::Lost);
        assert_eq!(store.capacity(ticket.event_id).unwrap().unwrap().sold, 0);
    }

    #[tokio::test]
    async fn invalid_command_is_refused_before_writing() {
        let (store, lifecycle, ticket) = setup(Money::ZERO);
        let err = lifecycle
            .apply(&ticket, TicketCommand::Cancel { paid: false })
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::Transition(_)));
        let stored = store.ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Pending);
    }

    #[tokio::test]
    async fn verify_requires_active_matching_event() {
        let (_store, lifecycle, ticket) = setup(Money::ZERO);
        assert!(!lifecycle.verify(ticket.id, ticket.event_id).await.unwrap());

        lifecycle.apply(&ticket, TicketCommand::ConfirmPayment).await.unwrap();
        assert!(lifecycle.verify(ticket.id, ticket.event_id).await.unwrap());
        assert!(!lifecycle.verify(ticket.id, EventId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn credential_only_for_owner() {
        let (_store, lifecycle, ticket) = setup(Money::ZERO);
        lifecycle.apply(&ticket, TicketCommand::ConfirmPayment).await.unwrap();

        let credential = lifecycle.credential(ticket.user_id, ticket.id).await.unwrap();
        assert_eq!(credential.attendance_code, ticket.attendance_code);

        let err = lifecycle.credential(UserId::new(), ticket.id).await.unwrap_err();
        assert!(matches!(err, TicketError::Unauthorized));
    }
}
