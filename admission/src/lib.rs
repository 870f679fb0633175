//! # Admission
//!
//! Capacity-safe ticket purchase and payment reconciliation.
//!
//! The core guarantees:
//!
//! - **No overselling**: capacity is reserved under a per-event row lock
//!   held by the data store, so the guarantee holds across processes.
//! - **At-most-once reconciliation**: a payment notification applies only
//!   if a conditional write finds the transaction still `pending`.
//! - **Auditable rollback**: a purchase that fails after reserving capacity
//!   undoes its steps from an explicit list, in reverse, logging each one.
//! - **No stale holds**: an expiry sweeper returns capacity held by
//!   abandoned checkouts.
//!
//! ## Layout
//!
//! - [`ledger`], [`machines`]: pure capacity arithmetic and state machines
//! - [`store`]: storage contracts with `PostgreSQL` and in-memory backends
//! - [`gateway`]: payment gateway client, mock and signature scheme
//! - [`purchase`], [`lifecycle`], [`reconciler`], [`sweeper`]: services
//! - [`server`], [`runtime`]: HTTP surface and process lifecycle

pub mod app;
pub mod attendance_code;
pub mod clock;
pub mod compensation;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod lifecycle;
pub mod machines;
pub mod metrics;
pub mod purchase;
pub mod reconciler;
pub mod runtime;
pub mod server;
pub mod store;
pub mod sweeper;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod mocks;

pub use app::Services;
pub use attendance_code::AttendanceCode;
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use error::{PurchaseError, ReconcileError, StoreError, TicketError};
pub use purchase::{PurchaseReceipt, PurchaseRequest, PurchaseService};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use runtime::Application;
pub use sweeper::ExpirySweeper;
pub use types::{
    EventId, EventSnapshot, Money, Ticket, TicketId, TicketStatus, Transaction, TransactionId,
    TransactionStatus, UserId, UserProfile,
};
