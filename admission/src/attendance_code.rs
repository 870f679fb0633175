//! Short, human-enterable codes used for physical check-in.
//!
//! Codes are 8 symbols from a 32-symbol alphabet that omits `0`, `O`, `1` and
//! `I`, so a code read aloud or typed from a phone screen survives the trip.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Symbols a code may contain.
pub const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of symbols in a code.
pub const CODE_LENGTH: usize = 8;

/// How many fresh codes a reservation draws before giving up on uniqueness.
pub const MAX_CODE_ATTEMPTS: usize = 5;

/// Rejected attendance code input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidAttendanceCode {
    /// Wrong number of symbols
    #[error("attendance code must be {CODE_LENGTH} characters, got {0}")]
    Length(usize),
    /// Symbol outside the alphabet
    #[error("attendance code contains invalid character {0:?}")]
    Symbol(char),
}

/// An attendance code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttendanceCode(String);

impl AttendanceCode {
    /// Draw a fresh code from the thread-local CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..CODE_LENGTH)
            .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
            .collect();
        Self(code)
    }

    /// Parse user input. Case and surrounding whitespace are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidAttendanceCode`] if the input has the wrong length or
    /// contains a symbol outside [`ALPHABET`].
    pub fn parse(input: &str) -> Result<Self, InvalidAttendanceCode> {
        let normalized = input.trim().to_ascii_uppercase();
        let len = normalized.chars().count();
        if len != CODE_LENGTH {
            return Err(InvalidAttendanceCode::Length(len));
        }
        if let Some(bad) = normalized
            .chars()
            .find(|c| !u8::try_from(*c).is_ok_and(|b| ALPHABET.contains(&b)))
        {
            return Err(InvalidAttendanceCode::Symbol(bad));
        }
        Ok(Self(normalized))
    }

    /// The code as stored and displayed.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttendanceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AttendanceCode {
    type Error = InvalidAttendanceCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AttendanceCode> for String {
    fn from(code: AttendanceCode) -> Self {
        code.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn alphabet_excludes_ambiguous_symbols() {
        for ambiguous in [b'0', b'O', b'1', b'I'] {
            assert!(!ALPHABET.contains(&ambiguous));
        }
        let mut sorted = ALPHABET.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 32);
    }

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        let code = AttendanceCode::parse("  abcd2345 ").unwrap();
        assert_eq!(code.as_str(), "ABCD2345");
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert_eq!(
            AttendanceCode::parse("ABC"),
            Err(InvalidAttendanceCode::Length(3))
        );
    }

    #[test]
    fn parse_rejects_ambiguous_symbols() {
        assert_eq!(
            AttendanceCode::parse("ABCD0123"),
            Err(InvalidAttendanceCode::Symbol('0'))
        );
        assert!(AttendanceCode::parse("ABCDÉFGH").is_err());
    }

    #[test]
    fn deserialization_validates() {
        assert!(serde_json::from_str::<AttendanceCode>("\"ABCD2345\"").is_ok());
        assert!(serde_json::from_str::<AttendanceCode>("\"short\"").is_err());
    }

    proptest! {
        #[test]
        fn generated_codes_always_parse(_seed in 0u32..1000) {
            let code = AttendanceCode::generate();
            prop_assert_eq!(code.as_str().len(), CODE_LENGTH);
            prop_assert_eq!(AttendanceCode::parse(code.as_str()).unwrap(), code);
        }
    }
}
