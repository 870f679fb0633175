//! Expiry sweeper.
//!
//! Abandoned checkouts keep their capacity reserved until this pass expires
//! them. One atomic statement moves every stale `pending` ticket to
//! `expired` and returns the set; each returned ticket then gets the expiry
//! effects (release one unit, drop any attendee row). Because the statement
//! only matches `pending` rows, an `active` ticket is never touched and a
//! ticket can only be released once even if two replicas sweep together.

use crate::clock::Clock;
use crate::error::StoreError;
use crate::lifecycle::TicketLifecycle;
use crate::machines::ticket::{self, TicketCommand};
use crate::store::AdmissionStore;
use crate::types::TicketStatus;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Default age, in seconds, after which a pending ticket expires.
pub const DEFAULT_PENDING_TTL_SECS: i64 = 3600;

/// Result of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tickets moved to `expired`
    pub expired: usize,
}

/// Periodic expiry of stale pending tickets.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn AdmissionStore>,
    lifecycle: TicketLifecycle,
    clock: Arc<dyn Clock>,
    pending_ttl: Duration,
    interval: std::time::Duration,
}

impl ExpirySweeper {
    /// Create a sweeper.
    #[must_use]
    pub fn new(
        store: Arc<dyn AdmissionStore>,
        clock: Arc<dyn Clock>,
        pending_ttl: Duration,
        interval: std::time::Duration,
    ) -> Self {
        let lifecycle = TicketLifecycle::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            lifecycle,
            clock,
            pending_ttl,
            interval,
        }
    }

    /// Run one pass.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the expiry statement fails. Failures of the
    /// per-ticket effects are logged and do not fail the pass.
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let cutoff = self.clock.now() - self.pending_ttl;
        let expired = self.store.expire_pending(cutoff).await?;
        if expired.is_empty() {
            return Ok(SweepReport::default());
        }

        match ticket::transition(TicketStatus::Pending, TicketCommand::Expire) {
            Ok(transition) => {
                for t in &expired {
                    self.lifecycle.run_effects(t, &transition.effects).await;
                }
            }
            Err(e) => error!(error = %e, "Expiry transition missing from ticket machine"),
        }

        let count = expired.len();
        metrics::counter!("admission_tickets_expired_total")
            .increment(u64::try_from(count).unwrap_or(u64::MAX));
        info!(expired = count, cutoff = %cutoff, "Expired stale pending tickets");
        Ok(SweepReport { expired: count })
    }

    /// Sweep immediately, then every interval, until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.interval.as_secs(),
            pending_ttl_secs = self.pending_ttl.num_seconds(),
            "Expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "Expiry sweep failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Expiry sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) on the runtime.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

impl std::fmt::Debug for ExpirySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirySweeper")
            .field("pending_ttl", &self.pending_ttl)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::attendance_code::AttendanceCode;
    use crate::mocks::{ManualClock, test_epoch};
    use crate::store::{InMemoryStore, TicketStore};
    use crate::types::{EventId, EventSnapshot, Money, Ticket, TicketId, UserId};

    fn pending_at(event_id: EventId, minutes_ago: i64) -> Ticket {
        Ticket {
            id: TicketId::new(),
            user_id: UserId::new(),
            event_id,
            price_paid: Money::from_cents(500),
            attendance_code: AttendanceCode::generate(),
            status: TicketStatus::Pending,
            is_checked_in: false,
            checked_in_at: None,
            purchased_at: test_epoch() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn only_tickets_past_threshold_expire() {
        let store = Arc::new(InMemoryStore::new());
        let event_id = EventId::new();
        store
            .insert_event(EventSnapshot {
                id: event_id,
                title: "Late Show".to_string(),
                host_id: UserId::new(),
                capacity: 5,
                sold: 2,
                price: Money::from_cents(500),
                starts_at: test_epoch() + Duration::days(1),
            })
            .unwrap();
        let stale = pending_at(event_id, 61);
        let fresh = pending_at(event_id, 59);
        store.insert_ticket(stale.clone()).unwrap();
        store.insert_ticket(fresh.clone()).unwrap();

        let clock = Arc::new(ManualClock::new(test_epoch()));
        let sweeper = ExpirySweeper::new(
            store.clone(),
            clock,
            Duration::seconds(DEFAULT_PENDING_TTL_SECS),
            std::time::Duration::from_secs(300),
        );

        assert_eq!(sweeper.sweep_once().await.unwrap().expired, 1);
        assert_eq!(
            store.ticket(stale.id).await.unwrap().unwrap().status,
            TicketStatus::Expired
        );
        assert_eq!(
            store.ticket(fresh.id).await.unwrap().unwrap().status,
            TicketStatus::Pending
        );
        assert_eq!(store.capacity(event_id).unwrap().unwrap().sold, 1);

        // A second pass finds nothing new.
        assert_eq!(sweeper.sweep_once().await.unwrap().expired, 0);
        assert_eq!(store.capacity(event_id).unwrap().unwrap().sold, 1);
    }
}
