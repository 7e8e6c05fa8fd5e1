//! Session ID generation and management
//!
//! Session IDs are the tokens players share to join a game. They carry 48
//! bits drawn from the operating system's random source and are displayed as
//! twelve lowercase hexadecimal digits, so they are short enough to paste or
//! read aloud but cannot be enumerated.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Number of random bits in a session ID
const BITS: u32 = 48;
/// Exclusive upper bound of a session ID value
const MAX_VALUE: u64 = 1 << BITS;
/// Number of hexadecimal digits in the display form
const DIGITS: usize = (BITS / 4) as usize;

/// An opaque, unguessable identifier for a game session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

/// Errors raised when parsing a session ID
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseError {
    /// The ID does not have exactly twelve digits
    #[error("session id must be {DIGITS} characters")]
    Length,
    /// The ID contains a character that is not a hexadecimal digit
    #[error("session id must be hexadecimal")]
    Digit,
}

impl SessionId {
    /// Creates a new random session ID
    ///
    /// The bits come from a version 4 UUID, which draws from the operating
    /// system's cryptographic random source.
    pub fn new() -> Self {
        Self(Uuid::new_v4().as_u64_pair().0 % MAX_VALUE)
    }
}

impl Default for SessionId {
    /// Creates a new random session ID (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    /// Formats the session ID as twelve lowercase hexadecimal digits
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:0width$x}", self.0, width = DIGITS)
    }
}

impl FromStr for SessionId {
    type Err = ParseError;

    /// Parses a session ID from its hexadecimal form
    ///
    /// Surrounding whitespace is ignored and uppercase digits are accepted,
    /// since IDs are often copied by hand.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the string is not exactly twelve
    /// hexadecimal digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != DIGITS {
            return Err(ParseError::Length);
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::Digit);
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| ParseError::Digit)
    }
}

impl Serialize for SessionId {
    /// Serializes the session ID as a hexadecimal string
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    /// Deserializes a session ID from a hexadecimal string
    fn deserialize<D>(deserializer: D) -> Result<SessionId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SessionId::from_str(&s).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}
