//! Expiry sweeper tests driven by a manual clock.
//!
//! Run with: `cargo test --test expiry_sweeper_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use admission::gateway::MockPaymentGateway;
use admission::mocks::{ManualClock, test_epoch};
use admission::store::{InMemoryStore, TicketStore, TransactionStore};
use admission::sweeper::DEFAULT_PENDING_TTL_SECS;
use admission::{
    Clock, EventId, EventSnapshot, ExpirySweeper, Money, PurchaseRequest, PurchaseService,
    TicketId, TicketStatus, TransactionStatus, UserId, UserProfile,
};
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::broadcast;

struct Fixture {
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    purchases: PurchaseService,
    sweeper: ExpirySweeper,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(test_epoch()));
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let purchases = PurchaseService::new(
        store.clone(),
        MockPaymentGateway::shared(),
        Arc::clone(&dyn_clock),
    );
    let sweeper = ExpirySweeper::new(
        store.clone(),
        dyn_clock,
        Duration::seconds(DEFAULT_PENDING_TTL_SECS),
        std::time::Duration::from_millis(20),
    );
    Fixture {
        store,
        clock,
        purchases,
        sweeper,
    }
}

impl Fixture {
    fn event(&self, price: Money) -> EventId {
        let id = EventId::new();
        self.store
            .insert_event(EventSnapshot {
                id,
                title: "Workshop".to_string(),
                host_id: UserId::new(),
                capacity: 5,
                sold: 0,
                price,
                starts_at: test_epoch() + Duration::days(30),
            })
            .unwrap();
        id
    }

    async fn buy(&self, event_id: EventId) -> TicketId {
        let user_id = UserId::new();
        self.store
            .insert_user(UserProfile {
                id: user_id,
                name: "Budi".to_string(),
                email: format!("{user_id}@example.com"),
                events_attended: 0,
            })
            .unwrap();
        self.purchases
            .purchase(PurchaseRequest {
                user_id,
                event_id,
                payment_method: None,
            })
            .await
            .unwrap()
            .ticket
            .id
    }

    async fn status(&self, ticket_id: TicketId) -> TicketStatus {
        self.store.ticket(ticket_id).await.unwrap().unwrap().status
    }

    fn sold(&self, event_id: EventId) -> u32 {
        self.store.capacity(event_id).unwrap().unwrap().sold
    }
}

#[tokio::test]
async fn test_abandoned_checkout_returns_capacity() {
    println!("🧪 Pending ticket older than an hour expires");
    let fx = fixture();
    let event_id = fx.event(Money::from_cents(5_000));
    let stale = fx.buy(event_id).await;
    fx.clock.advance(Duration::minutes(30));
    let fresh = fx.buy(event_id).await;
    assert_eq!(fx.sold(event_id), 2);

    fx.clock.advance(Duration::minutes(31));
    let report = fx.sweeper.sweep_once().await.unwrap();

    assert_eq!(report.expired, 1);
    assert_eq!(fx.status(stale).await, TicketStatus::Expired);
    assert_eq!(fx.status(fresh).await, TicketStatus::Pending);
    assert_eq!(fx.sold(event_id), 1);
    println!("  ✅ Stale ticket expired, fresh ticket kept");
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let fx = fixture();
    let event_id = fx.event(Money::from_cents(5_000));
    fx.buy(event_id).await;
    fx.clock.advance(Duration::hours(2));

    assert_eq!(fx.sweeper.sweep_once().await.unwrap().expired, 1);
    assert_eq!(fx.sweeper.sweep_once().await.unwrap().expired, 0);
    assert_eq!(fx.sold(event_id), 0);
}

#[tokio::test]
async fn test_active_tickets_are_never_swept() {
    println!("🧪 Free (active) tickets survive any age");
    let fx = fixture();
    let event_id = fx.event(Money::ZERO);
    let ticket_id = fx.buy(event_id).await;
    assert_eq!(fx.status(ticket_id).await, TicketStatus::Active);

    fx.clock.advance(Duration::days(3));
    let report = fx.sweeper.sweep_once().await.unwrap();

    assert_eq!(report.expired, 0);
    assert_eq!(fx.status(ticket_id).await, TicketStatus::Active);
    assert_eq!(fx.sold(event_id), 1);
    println!("  ✅ Active ticket untouched");
}

#[tokio::test]
async fn test_expired_checkout_leaves_transaction_pending() {
    let fx = fixture();
    let event_id = fx.event(Money::from_cents(5_000));
    let ticket_id = fx.buy(event_id).await;
    fx.clock.advance(Duration::hours(2));

    fx.sweeper.sweep_once().await.unwrap();

    let transactions = fx.store.transactions_for_ticket(ticket_id).unwrap();
    assert_eq!(transactions.len(), 1);
    let stored = fx
        .store
        .transaction_by_ref(&transactions[0].external_ref)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_background_loop_sweeps_at_startup_and_stops_on_shutdown() {
    println!("🧪 Sweeper loop runs immediately and honours shutdown");
    let fx = fixture();
    let event_id = fx.event(Money::from_cents(5_000));
    let ticket_id = fx.buy(event_id).await;
    fx.clock.advance(Duration::hours(2));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = fx.sweeper.clone().spawn(shutdown_rx);

    let mut expired = false;
    for _ in 0..100 {
        if fx.status(ticket_id).await == TicketStatus::Expired {
            expired = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(expired, "startup sweep should expire the stale ticket");

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("sweeper did not stop")
        .unwrap();
    println!("  ✅ Expired on first tick, stopped on shutdown");
}
