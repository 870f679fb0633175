//! Domain types for ticket admission.
//!
//! Identifiers, money, the ticket and transaction records, and the read-only
//! event/user snapshots the purchase flow consults.

use crate::attendance_code::AttendanceCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an event
    EventId
);
uuid_id!(
    /// Unique identifier for a user
    UserId
);
uuid_id!(
    /// Unique identifier for a ticket
    TicketId
);
uuid_id!(
    /// Unique identifier for a payment transaction
    TransactionId
);

// ============================================================================
// Money
// ============================================================================

/// Largest difference, in major currency units, tolerated between the amount
/// a gateway reports and the amount on record.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

/// Amount of money in minor units (cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Amount in major units, as sent to the payment gateway.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // ticket prices are far below 2^52 cents
    pub fn as_major(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Whether a gateway-reported decimal amount matches this amount within
    /// [`AMOUNT_TOLERANCE`].
    ///
    /// Unparseable, negative and non-finite reports never match.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn matches_reported(&self, reported: &str) -> bool {
        let Ok(value) = reported.trim().parse::<f64>() else {
            return false;
        };
        if !value.is_finite() || value < 0.0 {
            return false;
        }
        // Compare in cents so "100.01" vs 100.00 is not lost to float error.
        let diff_cents = (value * 100.0 - self.0 as f64).abs();
        diff_cents <= AMOUNT_TOLERANCE * 100.0 + 1e-6
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Statuses
// ============================================================================

/// Lifecycle status of a ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Capacity held, payment unresolved
    Pending,
    /// Valid and usable
    Active,
    /// Withdrawn; capacity released
    Cancelled,
    /// Timed out while pending; capacity released
    Expired,
    /// Cancelled after money changed hands
    Refunded,
}

impl TicketStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Refunded => "refunded",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Whether the ticket still occupies a unit of capacity.
    #[must_use]
    pub const fn holds_capacity(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a payment attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Awaiting gateway notification
    Pending,
    /// Money captured
    Success,
    /// Denied, cancelled or expired at the gateway
    Failed,
    /// Money returned
    Refunded,
}

impl TransactionStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// A ticket for one user at one event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Owning user
    pub user_id: UserId,
    /// Event the ticket admits to
    pub event_id: EventId,
    /// Price paid at purchase time
    pub price_paid: Money,
    /// Human-enterable code for physical check-in
    pub attendance_code: AttendanceCode,
    /// Current status
    pub status: TicketStatus,
    /// Whether the holder has been admitted
    pub is_checked_in: bool,
    /// When the holder was admitted
    pub checked_in_at: Option<DateTime<Utc>>,
    /// When the ticket was created
    pub purchased_at: DateTime<Utc>,
}

impl Ticket {
    /// Whether the ticket was paid for.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        !self.price_paid.is_zero()
    }

    /// Whether the holder may still cancel.
    #[must_use]
    pub const fn can_be_cancelled(&self) -> bool {
        matches!(self.status, TicketStatus::Active) && !self.is_checked_in
    }

    /// Whether the ticket admits its holder to `event_id` right now.
    #[must_use]
    pub fn is_valid_for(&self, event_id: EventId) -> bool {
        self.event_id == event_id && self.status == TicketStatus::Active && !self.is_checked_in
    }
}

/// Everything needed to create a ticket, minus its attendance code.
///
/// The code is drawn inside the reservation so a collision can be retried
/// without another round trip through the caller.
#[derive(Clone, Debug)]
pub struct TicketDraft {
    /// Ticket ID
    pub id: TicketId,
    /// Owning user
    pub user_id: UserId,
    /// Event
    pub event_id: EventId,
    /// Price at purchase time
    pub price_paid: Money,
    /// Initial status (`pending` for priced, `active` for free)
    pub status: TicketStatus,
    /// Creation time
    pub purchased_at: DateTime<Utc>,
}

impl TicketDraft {
    /// Materialize the draft with a concrete attendance code.
    #[must_use]
    pub fn into_ticket(self, attendance_code: AttendanceCode) -> Ticket {
        Ticket {
            id: self.id,
            user_id: self.user_id,
            event_id: self.event_id,
            price_paid: self.price_paid,
            attendance_code,
            status: self.status,
            is_checked_in: false,
            checked_in_at: None,
            purchased_at: self.purchased_at,
        }
    }
}

/// One payment attempt for a paid ticket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID
    pub id: TransactionId,
    /// Ticket paid for
    pub ticket_id: TicketId,
    /// Paying user
    pub user_id: UserId,
    /// Gateway order identifier
    pub external_ref: String,
    /// Amount charged
    pub amount: Money,
    /// Current status
    pub status: TransactionStatus,
    /// Payment method hint given at purchase
    pub payment_method: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// When the transaction reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

/// Read-only view of an event as the admission flow needs it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    /// Event ID
    pub id: EventId,
    /// Title, used as the gateway item name
    pub title: String,
    /// Organizer
    pub host_id: UserId,
    /// Maximum tickets
    pub capacity: u32,
    /// Tickets currently holding capacity
    pub sold: u32,
    /// Ticket price; zero means free
    pub price: Money,
    /// Start time
    pub starts_at: DateTime<Utc>,
}

impl EventSnapshot {
    /// Whether tickets are free.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.price.is_zero()
    }

    /// Whether the snapshot shows no remaining capacity.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.sold >= self.capacity
    }

    /// Whether the event has started at `now`.
    #[must_use]
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now
    }
}

/// Read-only view of a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User ID
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
    /// Events attended so far
    pub events_attended: u32,
}
