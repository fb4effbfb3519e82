// crates/fleetstore-core/src/manifest.rs
// ============================================================================
// Module: Backup Bundle Manifest
// Description: Manifest written into every backup bundle plus the pre-flight
//              validation report for restore.
// Purpose: Make bundles self-describing so restore can refuse damaged or
//          incompatible input before touching the live shard set.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Every backup bundle carries a `backup-metadata.json` manifest enumerating
//! the shard copies inside it, their sizes, active flags, and SHA-256
//! checksums. Restore first runs the manifest through [`BundleValidation`]:
//! hard errors abort with zero filesystem writes, warnings are surfaced but
//! do not block.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::version::SchemaVersion;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// File name of the manifest inside a bundle.
pub const MANIFEST_FILENAME: &str = "backup-metadata.json";
/// Manifest format version written by this build.
pub const CURRENT_MANIFEST_VERSION: u32 = 1;

// ============================================================================
// SECTION: Manifest
// ============================================================================

/// How a backup was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// Schedule-triggered snapshot into the managed backup directory.
    Auto,
    /// User-triggered portable archive.
    Manual,
}

/// One shard copy recorded in a bundle manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    /// Shard file name inside the bundle's `databases/` directory.
    pub filename: String,
    /// Size of the copied shard file in bytes.
    pub size_bytes: u64,
    /// Whether this shard was the active shard at backup time.
    pub is_active: bool,
    /// Hex SHA-256 of the copied shard file.
    pub sha256: String,
}

/// Manifest describing a backup bundle.
///
/// # Invariants
/// - A valid bundle declares at least one shard entry.
/// - At most one entry has `is_active = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Manifest format version.
    pub manifest_version: u32,
    /// Highest schema version across the bundled shards.
    pub schema_version: SchemaVersion,
    /// Instant the backup was taken.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// How the backup was triggered.
    pub kind: BackupKind,
    /// Shard copies inside the bundle.
    pub shards: Vec<ShardEntry>,
    /// Whether ancillary profile files were captured.
    pub has_profile_data: bool,
    /// Total bytes across all shard copies.
    pub total_size_bytes: u64,
    /// Application version that produced the bundle.
    pub app_version: String,
}

impl BackupManifest {
    /// Returns the entry flagged active at backup time, if any.
    #[must_use]
    pub fn active_shard(&self) -> Option<&ShardEntry> {
        self.shards.iter().find(|entry| entry.is_active)
    }
}

// ============================================================================
// SECTION: Validation Report
// ============================================================================

/// Pre-flight validation result for a backup bundle.
///
/// # Invariants
/// - `is_valid()` is true exactly when `errors` is empty and a manifest was
///   recovered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleValidation {
    /// Fatal problems; any entry blocks restore.
    pub errors: Vec<String>,
    /// Non-fatal observations surfaced to the caller.
    pub warnings: Vec<String>,
    /// The parsed manifest when one was recovered.
    pub manifest: Option<BackupManifest>,
}

impl BundleValidation {
    /// Records a fatal validation problem.
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Records a non-fatal observation.
    pub fn push_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Returns whether the bundle may be restored.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.manifest.is_some()
    }
}
