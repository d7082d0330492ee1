//! Core identifier types for tether.
//!
//! Lease owners and behaviors are addressed by name on the actuator, so both
//! are validated string newtypes. Sessions get a random UUID that only lives
//! in logs and summaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length in bytes of a client or behavior name.
pub const MAX_NAME_LEN: usize = 64;

fn validate_name(s: &str, allow: impl Fn(char) -> bool) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }
    if s.len() > MAX_NAME_LEN {
        return Err(IdError::TooLong {
            max: MAX_NAME_LEN,
            got: s.len(),
        });
    }
    if let Some(c) = s.chars().find(|c| !allow(*c)) {
        return Err(IdError::InvalidChar(c));
    }
    Ok(())
}

/// The identity a lease is held under.
///
/// Any printable, non-whitespace-only ASCII is accepted so that host-derived
/// names like `scale@laptop.local` work unchanged.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientName(String);

impl ClientName {
    /// Create a validated client name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, longer than [`MAX_NAME_LEN`], or
    /// contains non-printable ASCII.
    pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        validate_name(&name, |c| c.is_ascii_graphic() || c == ' ')?;
        if name.trim().is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(name))
    }

    /// Build a client name unique to this process, e.g. `tether-1a2b3c4d`.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let mut name = format!("{prefix}-{}", &suffix[..8]);
        name.truncate(MAX_NAME_LEN);
        Self(name)
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientName({})", self.0)
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientName {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ClientName {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClientName> for String {
    fn from(name: ClientName) -> Self {
        name.0
    }
}

/// The name a behavior is registered under on the actuator.
///
/// Restricted to `[a-z0-9_.-]` so it can be embedded in URL paths as-is.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BehaviorName(String);

impl BehaviorName {
    /// Create a validated behavior name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, too long, or contains anything
    /// other than lowercase ASCII letters, digits, `_`, `.` or `-`.
    pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        validate_name(&name, |c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-')
        })?;
        Ok(Self(name))
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BehaviorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BehaviorName({})", self.0)
    }
}

impl fmt::Display for BehaviorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BehaviorName {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BehaviorName {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BehaviorName> for String {
    fn from(name: BehaviorName) -> Self {
        name.0
    }
}

impl AsRef<str> for BehaviorName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A unique identifier for one orchestrated control session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Create a new `SessionId` from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a new random `SessionId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = IdError;

    /// Parse a `SessionId` from a UUID string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The name was empty.
    #[error("name must not be empty")]
    Empty,

    /// The name exceeded the maximum length.
    #[error("name too long: at most {max} bytes, got {got}")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length.
        got: usize,
    },

    /// The name contained a disallowed character.
    #[error("invalid character {0:?} in name")]
    InvalidChar(char),

    /// The UUID string was malformed.
    #[error("invalid UUID format")]
    InvalidUuid,
}
