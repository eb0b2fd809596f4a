//! Validated identity names.
//!
//! An identity is both the human-readable name a face is enrolled under and
//! the file stem of its records in the store, so it must never be able to
//! escape the store directory or collide with a device name.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{NO_PERSONS_FOUND, UNKNOWN_PERSON};

/// Longest accepted identity, in characters.
pub const MAX_IDENTITY_CHARS: usize = 64;

// Keeps `<identity>.json` under the common 255-byte file name limit.
const MAX_IDENTITY_BYTES: usize = 200;

// Path separators, characters invalid on common filesystems, and the
// attendance CSV field separator.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*', ','];

const RESERVED_DEVICE_NAMES: &[&str] = &["CON", "PRN", "AUX", "NUL"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity is empty")]
    Empty,
    #[error("identity exceeds {} characters", MAX_IDENTITY_CHARS)]
    TooLong,
    #[error("identity has leading or trailing whitespace")]
    Whitespace,
    #[error("identity may not start or end with '.'")]
    Dot,
    #[error("identity contains forbidden character {0:?}")]
    ForbiddenChar(char),
    #[error("identity {0:?} is reserved")]
    Reserved(String),
}

/// A validated, filesystem-safe identity name.
///
/// Ordering is lexicographic over the UTF-8 bytes, which is the scan order of
/// the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(name: &str) -> Result<Self, IdentityError> {
        if name.is_empty() {
            return Err(IdentityError::Empty);
        }
        if name.len() > MAX_IDENTITY_BYTES || name.chars().count() > MAX_IDENTITY_CHARS {
            return Err(IdentityError::TooLong);
        }
        if name.trim() != name {
            return Err(IdentityError::Whitespace);
        }
        if name.starts_with('.') || name.ends_with('.') {
            return Err(IdentityError::Dot);
        }
        if let Some(c) = name
            .chars()
            .find(|c| c.is_control() || FORBIDDEN_CHARS.contains(c))
        {
            return Err(IdentityError::ForbiddenChar(c));
        }
        if is_reserved(name) {
            return Err(IdentityError::Reserved(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Windows device names (with or without extension) and the wire sentinels.
fn is_reserved(name: &str) -> bool {
    if name == UNKNOWN_PERSON || name == NO_PERSONS_FOUND {
        return true;
    }

    let stem = name.split('.').next().unwrap_or(name).to_ascii_uppercase();
    if RESERVED_DEVICE_NAMES.contains(&stem.as_str()) {
        return true;
    }
    match stem.as_bytes() {
        [b'C', b'O', b'M', d] | [b'L', b'P', b'T', d] => (b'1'..=b'9').contains(d),
        _ => false,
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identity::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}
