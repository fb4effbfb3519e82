// crates/fleetstore-core/src/shard.rs
// ============================================================================
// Module: Shard Model
// Description: Shard file naming scheme and sidecar metadata records.
// Purpose: Keep the on-disk shard layout discoverable without opening the
//          data files themselves.
// Dependencies: serde, thiserror, time
// ============================================================================

//! ## Overview
//! A shard is one bounded-size database file plus a JSON sidecar describing
//! it. Shard files are named `<prefix>_<compact UTC timestamp>.db`; the
//! sidecar shares the stem and ends in `.meta.json`. At most one shard per
//! directory carries `is_active = true`; the rest are sealed history.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::version::SchemaVersion;

// ============================================================================
// SECTION: Naming
// ============================================================================

/// File extension of shard data files.
const SHARD_EXTENSION: &str = ".db";
/// File suffix of shard sidecar files.
const SIDECAR_SUFFIX: &str = ".meta.json";
/// Compact UTC timestamp embedded in shard file names (millisecond
/// precision so back-to-back rotations stay unique).
const SHARD_TIMESTAMP_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year][month][day]T[hour][minute][second][subsecond digits:3]");

/// Error raised when a shard file name cannot be produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShardNameError {
    /// The shard prefix contains characters outside `[A-Za-z0-9_-]`.
    #[error("invalid shard prefix {0:?}: only ASCII alphanumerics, '_' and '-' are allowed")]
    InvalidPrefix(String),
    /// The timestamp could not be rendered into the file name format.
    #[error("failed to format shard timestamp: {0}")]
    Timestamp(String),
}

/// Returns whether a prefix is acceptable for shard file names.
fn prefix_is_valid(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Builds the file name of a shard created at the given instant.
///
/// # Errors
///
/// Returns [`ShardNameError`] when the prefix is invalid or the timestamp
/// cannot be formatted.
pub fn shard_filename(prefix: &str, created_at: OffsetDateTime) -> Result<String, ShardNameError> {
    if !prefix_is_valid(prefix) {
        return Err(ShardNameError::InvalidPrefix(prefix.to_string()));
    }
    let stamp = created_at
        .format(SHARD_TIMESTAMP_FORMAT)
        .map_err(|err| ShardNameError::Timestamp(err.to_string()))?;
    Ok(format!("{prefix}_{stamp}{SHARD_EXTENSION}"))
}

/// Returns whether a file name looks like a shard data file for the prefix.
#[must_use]
pub fn is_shard_filename(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|rest| rest.ends_with(SHARD_EXTENSION))
}

/// Returns the sidecar file name for a shard file name.
///
/// Returns `None` when the input does not end in the shard extension.
#[must_use]
pub fn sidecar_filename(shard_name: &str) -> Option<String> {
    shard_name.strip_suffix(SHARD_EXTENSION).map(|stem| format!("{stem}{SIDECAR_SUFFIX}"))
}

// ============================================================================
// SECTION: Metadata
// ============================================================================

/// Sidecar metadata colocated with each shard file.
///
/// # Invariants
/// - `filename` matches the shard data file the sidecar sits next to.
/// - `closed_at` is `Some` exactly when the shard has been sealed.
/// - At most one sidecar per directory has `is_active = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMetadata {
    /// File name of the shard data file.
    pub filename: String,
    /// Creation instant of the shard.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Whether this shard is the single writable shard of its directory.
    pub is_active: bool,
    /// Instant the shard was sealed by a rotation, if any.
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub closed_at: Option<OffsetDateTime>,
    /// Highest migration version applied to the shard.
    pub schema_version: SchemaVersion,
}

/// A shard discovered on disk: its location, current size, and sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    /// Absolute path of the shard data file.
    pub path: PathBuf,
    /// Size of the data file in bytes at scan time.
    pub size_bytes: u64,
    /// Sidecar metadata read from disk.
    pub metadata: ShardMetadata,
}

impl ShardInfo {
    /// Returns the shard file name.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.metadata.filename
    }
}
