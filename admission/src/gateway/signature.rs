//! Notification signatures.
//!
//! `signature = hex(SHA-512(order_id || status_code || gross_amount || server_key))`.
//! Verification compares in constant time.

use super::PaymentNotification;
use sha2::{Digest, Sha512};

/// Compute the signature the gateway attaches to a notification.
#[must_use]
pub fn sign_notification(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl PaymentNotification {
    /// Build a correctly signed notification, as the gateway would send it.
    #[must_use]
    pub fn signed(
        order_id: impl Into<String>,
        transaction_status: impl Into<String>,
        gross_amount: impl Into<String>,
        server_key: &str,
    ) -> Self {
        let order_id = order_id.into();
        let transaction_status = transaction_status.into();
        let gross_amount = gross_amount.into();
        let status_code = match transaction_status.as_str() {
            "capture" | "settlement" => "200",
            "pending" => "201",
            _ => "202",
        }
        .to_string();
        let signature_key = sign_notification(&order_id, &status_code, &gross_amount, server_key);
        Self {
            order_id,
            status_code,
            gross_amount,
            transaction_status,
            currency: Some("IDR".to_string()),
            payment_type: None,
            fraud_status: None,
            signature_key,
        }
    }
}

/// Whether `notification` carries a valid signature for `server_key`.
///
/// Hex case in the received signature is ignored.
#[must_use]
pub fn verify_notification(notification: &PaymentNotification, server_key: &str) -> bool {
    if server_key.is_empty() {
        return false;
    }
    let expected = sign_notification(
        &notification.order_id,
        &notification.status_code,
        &notification.gross_amount,
        server_key,
    );
    let received = notification.signature_key.trim().to_ascii_lowercase();
    constant_time_eq::constant_time_eq(expected.as_bytes(), received.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(signature_key: String) -> PaymentNotification {
        PaymentNotification {
            order_id: "order-1".to_string(),
            status_code: "200".to_string(),
            gross_amount: "150000.00".to_string(),
            transaction_status: "settlement".to_string(),
            currency: Some("IDR".to_string()),
            payment_type: None,
            fraud_status: None,
            signature_key,
        }
    }

    #[test]
    fn signature_is_sha512_hex() {
        let signature = sign_notification("order-1", "200", "150000.00", "secret");
        assert_eq!(signature.len(), 128);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn valid_signature_verifies() {
        let signature = sign_notification("order-1", "200", "150000.00", "secret");
        assert!(verify_notification(&notification(signature.clone()), "secret"));
        assert!(verify_notification(
            &notification(signature.to_ascii_uppercase()),
            "secret"
        ));
    }

    #[test]
    fn tampered_fields_fail() {
        let signature = sign_notification("order-1", "200", "150000.00", "secret");
        let mut tampered = notification(signature);
        tampered.gross_amount = "1.00".to_string();
        assert!(!verify_notification(&tampered, "secret"));
    }

    #[test]
    fn signed_constructor_verifies() {
        let notification = PaymentNotification::signed("order-2", "deny", "10.00", "secret");
        assert_eq!(notification.status_code, "202");
        assert!(verify_notification(&notification, "secret"));
    }

    #[test]
    fn wrong_key_or_empty_key_fails() {
        let signature = sign_notification("order-1", "200", "150000.00", "secret");
        assert!(!verify_notification(&notification(signature.clone()), "other"));
        let unsigned = sign_notification("order-1", "200", "150000.00", "");
        assert!(!verify_notification(&notification(unsigned), ""));
    }
}
