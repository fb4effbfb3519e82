// crates/fleetstore-core/src/version.rs
// ============================================================================
// Module: Schema Version
// Description: Semantic schema version used by migrations and sidecars.
// Purpose: Order migration scripts and stamp shards with their schema level.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Every migration script carries a `major.minor.patch` version in its file
//! name, and every shard sidecar records the highest version applied to that
//! shard. Versions order numerically component by component, not
//! lexicographically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Error raised when a schema version string cannot be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid schema version {input:?}: {reason}")]
pub struct SchemaVersionError {
    /// The rejected input string.
    pub input: String,
    /// Why the input was rejected.
    pub reason: String,
}

// ============================================================================
// SECTION: Schema Version
// ============================================================================

/// Semantic version of a shard schema.
///
/// # Invariants
/// - Serializes as the wire string `major.minor.patch`.
/// - Ordering is numeric per component (`0.10.0` > `0.9.0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    /// Major version component.
    pub major: u64,
    /// Minor version component.
    pub minor: u64,
    /// Patch version component.
    pub patch: u64,
}

impl SchemaVersion {
    /// Version stamped on shards with no applied migrations.
    pub const ZERO: Self = Self::new(0, 0, 0);

    /// Creates a schema version from raw components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = SchemaVersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| SchemaVersionError {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let mut parts = input.split('.');
        let mut component = |label: &str| -> Result<u64, SchemaVersionError> {
            let raw = parts.next().ok_or_else(|| invalid(&format!("missing {label} component")))?;
            raw.parse::<u64>().map_err(|_| invalid(&format!("non-numeric {label} component")))
        };
        let major = component("major")?;
        let minor = component("minor")?;
        let patch = component("patch")?;
        if parts.next().is_some() {
            return Err(invalid("too many components"));
        }
        Ok(Self::new(major, minor, patch))
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = SchemaVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(version: SchemaVersion) -> Self {
        version.to_string()
    }
}
