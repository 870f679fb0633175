//! Business metrics for the admission service.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `admission_purchases_total{outcome}` - Purchase attempts by outcome
//! - `admission_webhooks_total{outcome}` - Gateway notifications by outcome
//! - `admission_tickets_expired_total` - Pending tickets expired by the sweeper
//! - `admission_capacity_released_total` - Capacity units returned to events
//! - `admission_rollbacks_total` - Purchase rollbacks executed
//! - `admission_compensations_failed_total{step}` - Rollback steps that failed
//! - `admission_check_ins_total` - Successful check-ins

use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "admission_purchases_total",
        "Purchase attempts by outcome (issued, pending_payment, sold_out, already_purchased, gateway_failed, store_failed, rejected)"
    );
    describe_counter!(
        "admission_webhooks_total",
        "Payment notifications by outcome (applied, already_processed, no_action, invalid_signature, amount_mismatch, error)"
    );
    describe_counter!(
        "admission_tickets_expired_total",
        "Pending tickets expired by the sweeper"
    );
    describe_counter!(
        "admission_capacity_released_total",
        "Capacity units returned to events"
    );
    describe_counter!(
        "admission_rollbacks_total",
        "Purchase rollbacks executed"
    );
    describe_counter!(
        "admission_compensations_failed_total",
        "Rollback steps that failed, by step"
    );
    describe_counter!(
        "admission_check_ins_total",
        "Tickets checked in at the door"
    );

    tracing::info!("Business metrics registered");
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if the exporter cannot be installed.
/// An already-installed recorder is tolerated with a warning.
pub fn start_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            tracing::info!(%addr, "Metrics exporter listening at http://{addr}/metrics");
            Ok(())
        }
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains("already") {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(())
            } else {
                Err(MetricsError::Install(err_msg))
            }
        }
    }
}
