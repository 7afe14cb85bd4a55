//! Trail identifiers.
//!
//! Trails are keyed by a 16-byte id. Externally the id is written in the
//! canonical 8-4-4-4-12 hex form (`771799eb-6a0d-4555-9917-0a5d449b35ab`).
//! Parsing accepts either hex case; rendering is always lowercase.

use crate::error::{Result, TrailError};
use std::fmt;
use std::str::FromStr;
use ::uuid::Uuid;

/// Length of the canonical text form.
pub const UUID_STRING_LEN: usize = 36;

const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// 16-byte trail identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrailUuid(Uuid);

impl TrailUuid {
    /// Wraps raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Returns the id as a [`Uuid`].
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses the canonical hyphenated hex form.
    ///
    /// The simple, braced and urn forms are rejected.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::InvalidUuid` if the string is not exactly 36
    /// characters of hex digits with hyphens at positions 8, 13, 18 and 23.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        let hyphenated = bytes.len() == UUID_STRING_LEN
            && HYPHEN_POSITIONS.iter().all(|&i| bytes[i] == b'-');
        if !hyphenated {
            return Err(TrailError::InvalidUuid(s.to_string()));
        }
        Uuid::try_parse(s)
            .map(Self)
            .map_err(|_| TrailError::InvalidUuid(s.to_string()))
    }

    /// Renders the canonical lowercase hyphenated form.
    pub fn to_hyphenated(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for TrailUuid {
    fn default() -> Self {
        Self(Uuid::nil())
    }
}

impl From<Uuid> for TrailUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<[u8; 16]> for TrailUuid {
    fn from(bytes: [u8; 16]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl FromStr for TrailUuid {
    type Err = TrailError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for TrailUuid {
    type Error = TrailError;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TrailUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl fmt::Debug for TrailUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrailUuid({})", self.0.hyphenated())
    }
}
