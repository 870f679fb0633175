//! Router configuration.

use super::handlers;
use super::health::{health_check, readiness_check};
use super::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};

/// Build the complete router.
///
/// Health probes sit at the root; everything else is under `/api`.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/events/:event_id/tickets", post(handlers::purchase_ticket))
        .route("/events/:event_id/check-in", post(handlers::check_in))
        .route(
            "/events/:event_id/tickets/:ticket_id/verify",
            get(handlers::verify_ticket),
        )
        .route("/tickets/:ticket_id/cancel", post(handlers::cancel_ticket))
        .route(
            "/tickets/:ticket_id/credential",
            get(handlers::ticket_credential),
        )
        .route("/payments/client-key", get(handlers::checkout_config))
        .route("/payments/:order_id/status", get(handlers::payment_status))
        .route("/webhooks/payment", post(handlers::payment_webhook));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .with_state(state)
}
