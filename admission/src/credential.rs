//! Scannable ticket credential.
//!
//! The QR payload is the credential serialized as JSON and base64-encoded.
//! Rendering it as an image is left to the client.

use crate::attendance_code::AttendanceCode;
use crate::types::{EventId, Ticket, TicketId, TicketStatus, UserId};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Credential could not be issued or read.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Only active tickets get a credential
    #[error("ticket {0} is not active")]
    NotActive(TicketId),
    /// Payload is not valid base64
    #[error("credential payload is not base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    /// Payload is not a credential
    #[error("credential payload is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// What a door scanner needs to admit a ticket holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCredential {
    /// Ticket
    pub ticket_id: TicketId,
    /// Event
    pub event_id: EventId,
    /// Holder
    pub user_id: UserId,
    /// Code for manual entry
    pub attendance_code: AttendanceCode,
}

impl TicketCredential {
    /// Issue a credential for an active ticket.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotActive`] for any other status.
    pub fn issue(ticket: &Ticket) -> Result<Self, CredentialError> {
        if ticket.status != TicketStatus::Active {
            return Err(CredentialError::NotActive(ticket.id));
        }
        Ok(Self {
            ticket_id: ticket.id,
            event_id: ticket.event_id,
            user_id: ticket.user_id,
            attendance_code: ticket.attendance_code.clone(),
        })
    }

    /// Encode as the QR payload.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Malformed`] if serialization fails.
    pub fn to_qr_payload(&self) -> Result<String, CredentialError> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    /// Decode a scanned QR payload.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the payload is not a credential.
    pub fn from_qr_payload(payload: &str) -> Result<Self, CredentialError> {
        let bytes = STANDARD.decode(payload.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::test_epoch;
    use crate::types::Money;

    fn ticket(status: TicketStatus) -> Ticket {
        Ticket {
            id: TicketId::new(),
            user_id: UserId::new(),
            event_id: EventId::new(),
            price_paid: Money::ZERO,
            attendance_code: AttendanceCode::parse("ABCD2345").unwrap(),
            status,
            is_checked_in: false,
            checked_in_at: None,
            purchased_at: test_epoch(),
        }
    }

    #[test]
    fn payload_decodes_to_same_credential() {
        let credential = TicketCredential::issue(&ticket(TicketStatus::Active)).unwrap();
        let payload = credential.to_qr_payload().unwrap();
        assert!(!payload.contains('{'));
        assert_eq!(TicketCredential::from_qr_payload(&payload).unwrap(), credential);
    }

    #[test]
    fn pending_ticket_gets_no_credential() {
        let err = TicketCredential::issue(&ticket(TicketStatus::Pending)).unwrap_err();
        assert!(matches!(err, CredentialError::NotActive(_)));
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(matches!(
            TicketCredential::from_qr_payload("not base64!"),
            Err(CredentialError::Encoding(_))
        ));
        let not_json = STANDARD.encode(b"hello");
        assert!(matches!(
            TicketCredential::from_qr_payload(&not_json),
            Err(CredentialError::Malformed(_))
        ));
    }
}
