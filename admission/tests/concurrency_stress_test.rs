//! Concurrency stress tests for the capacity ledger.
//!
//! Many buyers race for few seats; the ledger must hand out exactly
//! `capacity` tickets no matter how the tasks interleave.
//!
//! Run with: `cargo test --test concurrency_stress_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/expect

use admission::gateway::MockPaymentGateway;
use admission::mocks::{FixedClock, test_epoch};
use admission::store::InMemoryStore;
use admission::{
    EventId, EventSnapshot, Money, PurchaseError, PurchaseRequest, PurchaseService, UserId,
    UserProfile,
};
use chrono::Duration;
use std::sync::Arc;

fn seed(store: &InMemoryStore, capacity: u32, price: Money, buyers: usize) -> (EventId, Vec<UserId>) {
    let event_id = EventId::new();
    store
        .insert_event(EventSnapshot {
            id: event_id,
            title: "Last Seats".to_string(),
            host_id: UserId::new(),
            capacity,
            sold: 0,
            price,
            starts_at: test_epoch() + Duration::days(10),
        })
        .unwrap();
    let users = (0..buyers)
        .map(|i| {
            let id = UserId::new();
            store
                .insert_user(UserProfile {
                    id,
                    name: format!("Buyer {i}"),
                    email: format!("buyer{i}@example.com"),
                    events_attended: 0,
                })
                .unwrap();
            id
        })
        .collect();
    (event_id, users)
}

async fn race(
    service: Arc<PurchaseService>,
    event_id: EventId,
    users: Vec<UserId>,
) -> (usize, usize) {
    let handles: Vec<_> = users
        .into_iter()
        .map(|user_id| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .purchase(PurchaseRequest {
                        user_id,
                        event_id,
                        payment_method: None,
                    })
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut sold_out = 0;
    for handle in handles {
        match handle.await.expect("purchase task panicked") {
            Ok(_) => succeeded += 1,
            Err(PurchaseError::EventFull(id)) => {
                assert_eq!(id, event_id);
                sold_out += 1;
            }
            Err(other) => panic!("unexpected purchase error: {other}"),
        }
    }
    (succeeded, sold_out)
}

/// N concurrent buyers, capacity C < N: exactly C succeed.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_exactly_capacity_purchases_succeed() {
    println!("🧪 Concurrency Stress Test: 100 buyers for 10 seats");

    let store = Arc::new(InMemoryStore::new());
    let (event_id, users) = seed(&store, 10, Money::ZERO, 100);
    let service = Arc::new(PurchaseService::new(
        store.clone(),
        MockPaymentGateway::shared(),
        Arc::new(FixedClock::new(test_epoch())),
    ));

    let (succeeded, sold_out) = race(service, event_id, users).await;

    println!("  ✅ {succeeded} succeeded, {sold_out} sold out");
    assert_eq!(succeeded, 10);
    assert_eq!(sold_out, 90);
    assert_eq!(store.capacity(event_id).unwrap().unwrap().sold, 10);
    assert_eq!(store.tickets_for_event(event_id).unwrap().len(), 10);
}

/// Capacity 1, two simultaneous paid purchases by different users.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_seat_two_buyers() {
    println!("🧪 Last seat: 2 buyers for 1 paid seat");

    let store = Arc::new(InMemoryStore::new());
    let (event_id, users) = seed(&store, 1, Money::from_cents(10_000), 2);
    let gateway = MockPaymentGateway::shared();
    let service = Arc::new(PurchaseService::new(
        store.clone(),
        gateway.clone(),
        Arc::new(FixedClock::new(test_epoch())),
    ));

    let (succeeded, sold_out) = race(service, event_id, users).await;

    assert_eq!((succeeded, sold_out), (1, 1));
    assert_eq!(store.capacity(event_id).unwrap().unwrap().sold, 1);
    assert_eq!(gateway.charges().len(), 1, "loser never reaches the gateway");
    println!("  ✅ One ticket, one sold-out");
}

/// Reservations for different events never block each other.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_events_fill_independently() {
    let store = Arc::new(InMemoryStore::new());
    let (first, first_users) = seed(&store, 5, Money::ZERO, 20);
    let (second, second_users) = seed(&store, 7, Money::ZERO, 20);
    let service = Arc::new(PurchaseService::new(
        store.clone(),
        MockPaymentGateway::shared(),
        Arc::new(FixedClock::new(test_epoch())),
    ));

    let (a, b) = tokio::join!(
        race(Arc::clone(&service), first, first_users),
        race(Arc::clone(&service), second, second_users)
    );

    assert_eq!(a, (5, 15));
    assert_eq!(b, (7, 13));
    assert_eq!(store.capacity(first).unwrap().unwrap().sold, 5);
    assert_eq!(store.capacity(second).unwrap().unwrap().sold, 7);
}
