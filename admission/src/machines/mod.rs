//! Pure state machines for tickets and payment transactions.
//!
//! Transitions are computed without I/O. A ticket transition returns the
//! effects the caller must run once the conditional write that guards it has
//! succeeded, in the same spirit as a reducer returning effects as values.

pub mod ticket;
pub mod transaction;

use thiserror::Error;

/// A command that is not valid from the current state.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("cannot {command} a {from} {entity}")]
pub struct TransitionError {
    /// `ticket` or `transaction`
    pub entity: &'static str,
    /// Current state
    pub from: &'static str,
    /// Rejected command
    pub command: &'static str,
}
