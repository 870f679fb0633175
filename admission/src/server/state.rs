//! Application state for the admission HTTP server.

use crate::lifecycle::TicketLifecycle;
use crate::purchase::PurchaseService;
use crate::reconciler::Reconciler;
use crate::store::AdmissionStore;
use serde::Serialize;
use std::sync::Arc;

/// What a browser needs to open the hosted checkout widget.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutConfig {
    /// Public client key; never the server key
    pub client_key: String,
    /// `true` unless production endpoints are configured
    pub is_sandbox: bool,
}

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Purchase orchestrator
    pub purchases: Arc<PurchaseService>,
    /// Cancel, check-in and credential operations
    pub tickets: Arc<TicketLifecycle>,
    /// Payment notification reconciler
    pub reconciler: Arc<Reconciler>,
    /// Store, for readiness probes
    pub store: Arc<dyn AdmissionStore>,
    /// Public checkout settings
    pub checkout: Arc<CheckoutConfig>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        purchases: Arc<PurchaseService>,
        tickets: Arc<TicketLifecycle>,
        reconciler: Arc<Reconciler>,
        store: Arc<dyn AdmissionStore>,
        checkout: Arc<CheckoutConfig>,
    ) -> Self {
        Self {
            purchases,
            tickets,
            reconciler,
            store,
            checkout,
        }
    }
}
