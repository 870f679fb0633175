//! HTTP handlers.
//!
//! Thin adapters: decode, call one service method, encode. All business
//! decisions live in the services.

use super::error::AppError;
use super::extract::Caller;
use super::state::{AppState, CheckoutConfig};
use crate::credential::TicketCredential;
use crate::gateway::PaymentNotification;
use crate::purchase::{PaymentStatus, PurchaseReceipt, PurchaseRequest};
use crate::types::{EventId, Ticket, TicketId};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Purchase request body; may be omitted entirely.
#[derive(Debug, Default, Deserialize)]
pub struct PurchaseBody {
    /// Restrict checkout to one payment method
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// `POST /api/events/:event_id/tickets`
///
/// # Errors
///
/// See [`PurchaseError`](crate::error::PurchaseError) for the mapping.
pub async fn purchase_ticket(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(event_id): Path<EventId>,
    body: Option<Json<PurchaseBody>>,
) -> Result<(StatusCode, Json<PurchaseReceipt>), AppError> {
    let Json(body) = body.unwrap_or_default();
    let receipt = state
        .purchases
        .purchase(PurchaseRequest {
            user_id,
            event_id,
            payment_method: body.payment_method,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// `POST /api/tickets/:ticket_id/cancel`
///
/// # Errors
///
/// See [`TicketError`](crate::error::TicketError) for the mapping.
pub async fn cancel_ticket(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(ticket_id): Path<TicketId>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.tickets.cancel(user_id, ticket_id).await?))
}

/// Check-in request body.
#[derive(Debug, Deserialize)]
pub struct CheckInBody {
    /// Code as typed or scanned at the door
    pub attendance_code: String,
}

/// `POST /api/events/:event_id/check-in`
///
/// # Errors
///
/// See [`TicketError`](crate::error::TicketError) for the mapping.
pub async fn check_in(
    State(state): State<AppState>,
    Caller(host_id): Caller,
    Path(event_id): Path<EventId>,
    Json(body): Json<CheckInBody>,
) -> Result<Json<Ticket>, AppError> {
    let ticket = state
        .tickets
        .check_in(host_id, event_id, &body.attendance_code)
        .await?;
    Ok(Json(ticket))
}

/// Credential response.
#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    /// Decoded credential
    pub credential: TicketCredential,
    /// Payload to render as a QR code
    pub qr_payload: String,
}

/// `GET /api/tickets/:ticket_id/credential`
///
/// # Errors
///
/// See [`TicketError`](crate::error::TicketError) for the mapping.
pub async fn ticket_credential(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(ticket_id): Path<TicketId>,
) -> Result<Json<CredentialResponse>, AppError> {
    let credential = state.tickets.credential(user_id, ticket_id).await?;
    let qr_payload = credential
        .to_qr_payload()
        .map_err(|e| AppError::internal("Credential encoding failed").with_source(e))?;
    Ok(Json(CredentialResponse {
        credential,
        qr_payload,
    }))
}

/// Verification response.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    /// Whether the ticket admits its holder to the event right now
    pub valid: bool,
}

/// `GET /api/events/:event_id/tickets/:ticket_id/verify`
///
/// # Errors
///
/// Returns 404 for an unknown ticket.
pub async fn verify_ticket(
    State(state): State<AppState>,
    Caller(_): Caller,
    Path((event_id, ticket_id)): Path<(EventId, TicketId)>,
) -> Result<Json<VerifyResponse>, AppError> {
    let valid = state.tickets.verify(ticket_id, event_id).await?;
    Ok(Json(VerifyResponse { valid }))
}

/// `GET /api/payments/:order_id/status`
///
/// # Errors
///
/// See [`PurchaseError`](crate::error::PurchaseError) for the mapping.
pub async fn payment_status(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentStatus>, AppError> {
    Ok(Json(state.purchases.payment_status(user_id, &order_id).await?))
}

/// `GET /api/payments/client-key`
pub async fn checkout_config(State(state): State<AppState>) -> Json<CheckoutConfig> {
    Json(CheckoutConfig::clone(&state.checkout))
}

/// `POST /api/webhooks/payment`
///
/// Answers 400 only for an undecodable body or a bad signature. Once the
/// signature is accepted the answer is always 200, with a `warning` when
/// processing failed, so the gateway does not redeliver forever.
pub async fn payment_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    let notification: PaymentNotification = match serde_json::from_slice(&body) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "Undecodable payment notification");
            return AppError::bad_request("Invalid notification payload").into_response();
        }
    };

    match state.reconciler.reconcile(&notification).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) if e.is_rejection() => AppError::bad_request(e.to_string()).into_response(),
        Err(e) => {
            tracing::error!(
                order_id = %notification.order_id,
                error = %e,
                "Notification acknowledged without being applied"
            );
            (
                StatusCode::OK,
                Json(json!({
                    "order_id": notification.order_id,
                    "action": "none",
                    "warning": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}
