//! Ticket state machine.
//!
//! ```text
//!            ConfirmPayment            Cancel (free)
//!  pending ────────────────▶ active ─────────────────▶ cancelled
//!     │  FailPayment                   │ Cancel (paid)
//!     ├────────────▶ cancelled         └─────────────▶ refunded
//!     │  Expire
//!     └────────────▶ expired
//! ```
//!
//! Check-in is an orthogonal flag on `active` tickets, see [`check_in`].

use super::TransitionError;
use crate::types::TicketStatus;
use smallvec::{SmallVec, smallvec};

/// Something that happens to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketCommand {
    /// Payment reconciled as successful
    ConfirmPayment,
    /// Payment reconciled as failed, denied or expired at the gateway
    FailPayment,
    /// Pending past the expiry threshold
    Expire,
    /// Holder withdrew before the event
    Cancel {
        /// Whether money changed hands
        paid: bool,
    },
}

impl TicketCommand {
    /// Name used in logs and errors.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConfirmPayment => "confirm payment for",
            Self::FailPayment => "fail payment for",
            Self::Expire => "expire",
            Self::Cancel { .. } => "cancel",
        }
    }
}

/// Side effect owed once a transition has been committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketEffect {
    /// Add the holder to the event's confirmed attendees
    RegisterAttendee,
    /// Bump the holder's attendance counter
    IncrementAttendance,
    /// Return one unit of event capacity
    ReleaseCapacity,
    /// Drop any attendee registration for the holder
    RemoveAttendee,
    /// Record a `refunded` transaction for the price paid
    RecordRefund,
}

/// Effects list; no transition produces more than four.
pub type TicketEffects = SmallVec<[TicketEffect; 4]>;

/// Result of a valid transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketTransition {
    /// State the conditional write must observe
    pub from: TicketStatus,
    /// State to write
    pub to: TicketStatus,
    /// Effects owed after the write succeeds
    pub effects: TicketEffects,
}

/// Compute the transition for `command` from `status`.
///
/// # Errors
///
/// Returns [`TransitionError`] when the command is not valid from `status`.
pub fn transition(
    status: TicketStatus,
    command: TicketCommand,
) -> Result<TicketTransition, TransitionError> {
    use TicketCommand as C;
    use TicketEffect as E;
    use TicketStatus as S;

    let (to, effects): (S, TicketEffects) = match (status, command) {
        (S::Pending, C::ConfirmPayment) => {
            (S::Active, smallvec![E::RegisterAttendee, E::IncrementAttendance])
        }
        (S::Pending, C::FailPayment) => {
            (S::Cancelled, smallvec![E::ReleaseCapacity, E::RemoveAttendee])
        }
        (S::Pending, C::Expire) => (S::Expired, smallvec![E::ReleaseCapacity, E::RemoveAttendee]),
        (S::Active, C::Cancel { paid: false }) => {
            (S::Cancelled, smallvec![E::ReleaseCapacity, E::RemoveAttendee])
        }
        (S::Active, C::Cancel { paid: true }) => (
            S::Refunded,
            smallvec![E::ReleaseCapacity, E::RemoveAttendee, E::RecordRefund],
        ),
        (from, command) => {
            return Err(TransitionError {
                entity: "ticket",
                from: from.as_str(),
                command: command.as_str(),
            });
        }
    };

    Ok(TicketTransition {
        from: status,
        to,
        effects,
    })
}

/// Effects owed by a free ticket, which is issued directly as `active`.
///
/// The same effects as the `pending -> active` edge, without the write.
#[must_use]
pub fn issued_active_effects() -> TicketEffects {
    smallvec![TicketEffect::RegisterAttendee, TicketEffect::IncrementAttendance]
}

/// Why a ticket cannot be checked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInRejection {
    /// The flag is already set
    AlreadyCheckedIn,
    /// Only `active` tickets admit their holder
    NotActive,
}

/// Guard for the check-in flag: only `active` tickets, exactly once.
///
/// # Errors
///
/// Returns the [`CheckInRejection`] that applies.
pub const fn check_in(status: TicketStatus, is_checked_in: bool) -> Result<(), CheckInRejection> {
    if is_checked_in {
        return Err(CheckInRejection::AlreadyCheckedIn);
    }
    match status {
        TicketStatus::Active => Ok(()),
        _ => Err(CheckInRejection::NotActive),
    }
}
