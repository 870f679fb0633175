//! Payment transaction state machine and the gateway status vocabulary.
//!
//! A transaction leaves `pending` exactly once. Which terminal state it lands
//! in is decided by [`classify`], a fixed lookup over the gateway's status
//! codes.

use super::TransitionError;
use super::ticket::TicketCommand;
use crate::types::TransactionStatus;

/// Internal meaning of a gateway status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// Money captured
    Success,
    /// Payment will not happen
    Failed,
    /// Still outstanding, refund-equivalent, or unrecognized; touch nothing
    NoAction,
}

impl GatewayOutcome {
    /// Transaction status to write, if any.
    #[must_use]
    pub const fn transaction_status(&self) -> Option<TransactionStatus> {
        match self {
            Self::Success => Some(TransactionStatus::Success),
            Self::Failed => Some(TransactionStatus::Failed),
            Self::NoAction => None,
        }
    }

    /// Ticket command driven by this outcome, if any.
    #[must_use]
    pub const fn ticket_command(&self) -> Option<TicketCommand> {
        match self {
            Self::Success => Some(TicketCommand::ConfirmPayment),
            Self::Failed => Some(TicketCommand::FailPayment),
            Self::NoAction => None,
        }
    }

    /// Whether the signed `status_code` agrees with this outcome.
    ///
    /// `transaction_status` is not covered by the signature, so an outcome
    /// that writes state must be backed by the signed code the gateway sends
    /// with it: `200` for success, `202` (or `407` on expiry) for failure.
    #[must_use]
    pub fn accepts_status_code(&self, status_code: &str) -> bool {
        let code = status_code.trim();
        match self {
            Self::Success => code == "200",
            Self::Failed => matches!(code, "202" | "407"),
            Self::NoAction => true,
        }
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::NoAction => "no_action",
        }
    }
}

const STATUS_TABLE: &[(&str, GatewayOutcome)] = &[
    ("capture", GatewayOutcome::Success),
    ("settlement", GatewayOutcome::Success),
    ("deny", GatewayOutcome::Failed),
    ("cancel", GatewayOutcome::Failed),
    ("expire", GatewayOutcome::Failed),
    ("failure", GatewayOutcome::Failed),
    ("pending", GatewayOutcome::NoAction),
    // Refunds are recorded by the cancel path, not by notifications.
    ("refund", GatewayOutcome::NoAction),
    ("partial_refund", GatewayOutcome::NoAction),
];

/// Map a gateway status code to its internal outcome.
///
/// Unknown codes are [`GatewayOutcome::NoAction`].
#[must_use]
pub fn classify(gateway_status: &str) -> GatewayOutcome {
    let code = gateway_status.trim();
    STATUS_TABLE
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(code))
        .map_or(GatewayOutcome::NoAction, |(_, outcome)| *outcome)
}

/// Validate a transaction transition.
///
/// # Errors
///
/// Returns [`TransitionError`] unless `from` is `pending` and `to` is terminal.
pub fn transition(
    from: TransactionStatus,
    to: TransactionStatus,
) -> Result<TransactionStatus, TransitionError> {
    if from == TransactionStatus::Pending && to.is_terminal() {
        Ok(to)
    } else {
        Err(TransitionError {
            entity: "transaction",
            from: from.as_str(),
            command: match to {
                TransactionStatus::Pending => "reopen",
                TransactionStatus::Success => "settle",
                TransactionStatus::Failed => "fail",
                TransactionStatus::Refunded => "refund",
            },
        })
    }
}
