//! Rollback list for partially completed purchases.
//!
//! Each successful forward step pushes the action that undoes it. On failure
//! the list runs in reverse order; every step is attempted even if an earlier
//! one failed, and each failure is logged on its own. A failed release leaves
//! a unit of capacity leaked, which is preferred over failing the response.

use crate::store::AdmissionStore;
use crate::types::{EventId, TicketId};
use tracing::{info, warn};

/// One undo action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    /// Delete a ticket created by the reservation
    DeleteTicket(TicketId),
    /// Return the unit of capacity taken by the reservation
    ReleaseCapacity(EventId),
}

impl Compensation {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DeleteTicket(_) => "delete_ticket",
            Self::ReleaseCapacity(_) => "release_capacity",
        }
    }
}

/// What a rollback achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Steps that succeeded, in execution order
    pub completed: Vec<Compensation>,
    /// Steps that failed, in execution order
    pub failed: Vec<Compensation>,
}

impl RollbackReport {
    /// Whether capacity was leaked.
    #[must_use]
    pub fn leaked_capacity(&self) -> bool {
        self.failed
            .iter()
            .any(|c| matches!(c, Compensation::ReleaseCapacity(_)))
    }
}

/// Ordered undo actions for one purchase.
#[derive(Debug, Clone, Default)]
pub struct Rollback {
    steps: Vec<Compensation>,
}

impl Rollback {
    /// Empty rollback list.
    #[must_use]
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Register the undo action for a step that just succeeded.
    pub fn push(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    /// Registered steps in registration order.
    #[must_use]
    pub fn steps(&self) -> &[Compensation] {
        &self.steps
    }

    /// Run every step, last registered first.
    pub async fn execute(self, store: &dyn AdmissionStore, reason: &str) -> RollbackReport {
        let mut report = RollbackReport::default();
        for step in self.steps.into_iter().rev() {
            let result = match step {
                Compensation::DeleteTicket(ticket_id) => store.delete_ticket(ticket_id).await,
                Compensation::ReleaseCapacity(event_id) => store.release(event_id).await,
            };
            match result {
                Ok(()) => {
                    info!(step = step.as_str(), ?step, reason, "Compensation applied");
                    report.completed.push(step);
                }
                Err(e) => {
                    warn!(step = step.as_str(), ?step, reason, error = %e, "Compensation failed");
                    metrics::counter!("admission_compensations_failed_total", "step" => step.as_str())
                        .increment(1);
                    report.failed.push(step);
                }
            }
        }
        metrics::counter!("admission_rollbacks_total").increment(1);
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ledger::CapacityLedger;
    use crate::mocks::test_epoch;
    use crate::store::{InMemoryStore, TicketStore};
    use crate::types::{EventSnapshot, Money, TicketDraft, TicketStatus, UserId};
    use chrono::Duration;

    async fn reserved(store: &InMemoryStore) -> (EventId, TicketId) {
        let event = EventSnapshot {
            id: EventId::new(),
            title: "Gig".to_string(),
            host_id: UserId::new(),
            capacity: 10,
            sold: 0,
            price: Money::from_cents(1_000),
            starts_at: test_epoch() + Duration::days(1),
        };
        let event_id = event.id;
        store.insert_event(event).unwrap();
        let ticket = store
            .try_reserve(TicketDraft {
                id: TicketId::new(),
                user_id: UserId::new(),
                event_id,
                price_paid: Money::from_cents(1_000),
                status: TicketStatus::Pending,
                purchased_at: test_epoch(),
            })
            .await
            .unwrap();
        (event_id, ticket.id)
    }

    #[tokio::test]
    async fn runs_in_reverse_order() {
        let store = InMemoryStore::new();
        let (event_id, ticket_id) = reserved(&store).await;

        let mut rollback = Rollback::new();
        rollback.push(Compensation::ReleaseCapacity(event_id));
        rollback.push(Compensation::DeleteTicket(ticket_id));
        let report = rollback.execute(&store, "test").await;

        assert_eq!(
            report.completed,
            vec![
                Compensation::DeleteTicket(ticket_id),
                Compensation::ReleaseCapacity(event_id)
            ]
        );
        assert!(store.ticket(ticket_id).await.unwrap().is_none());
        assert_eq!(store.capacity(event_id).unwrap().unwrap().sold, 0);
    }

    #[tokio::test]
    async fn failed_step_does_not_stop_the_rest() {
        let store = InMemoryStore::new();
        let (event_id, ticket_id) = reserved(&store).await;
        store.fail_releases(true);

        let mut rollback = Rollback::new();
        rollback.push(Compensation::DeleteTicket(ticket_id));
        rollback.push(Compensation::ReleaseCapacity(event_id));
        let report = rollback.execute(&store, "test").await;

        assert!(report.leaked_capacity());
        assert_eq!(report.completed, vec![Compensation::DeleteTicket(ticket_id)]);
        assert!(store.ticket(ticket_id).await.unwrap().is_none());
        assert_eq!(store.capacity(event_id).unwrap().unwrap().sold, 1);
    }
}
