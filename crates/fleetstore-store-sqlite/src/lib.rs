// crates/fleetstore-store-sqlite/src/lib.rs
// ============================================================================
// Module: Fleetstore SQLite Engine
// Description: Shard rotation, migrations, hot backup, and staged restore
//              over an embedded SQLite store.
// Purpose: Keep the live database bounded in size and recoverable without
//          blocking writers.
// Dependencies: fleetstore-core, fleetstore-config, rusqlite, sha2, zip
// ============================================================================

//! ## Overview
//! The engine splits the store into bounded-size shard files, each a fully
//! migrated standalone database with a JSON sidecar. The
//! [`StorageRotationManager`] owns the single writable connection and seals
//! a shard into history when it crosses a size or row threshold, re-seeding
//! master tables into its replacement. The [`BackupEngine`] streams the
//! whole shard set into self-describing bundles via `SQLite`'s online
//! backup, and the [`RestoreEngine`] applies a bundle back only after
//! checksum and integrity gates pass. All three share one advisory
//! [`MaintenanceLock`] so overlapping maintenance is refused, never queued.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod backup;
mod lock;
mod metadata;
mod migrate;
mod restore;
mod rotation;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use backup::AUTO_BACKUP_PREFIX;
pub use backup::BackupEngine;
pub use backup::BackupEngineConfig;
pub use backup::BackupError;
pub use backup::BackupRecord;
pub use backup::DATABASES_DIR;
pub use backup::PROFILE_DIR;
pub use lock::MaintenanceGuard;
pub use lock::MaintenanceLock;
pub use lock::MaintenanceLockError;
pub use metadata::MetadataError;
pub use metadata::active_shard;
pub use metadata::read_metadata;
pub use metadata::scan_shards;
pub use metadata::sidecar_path;
pub use metadata::write_metadata;
pub use migrate::MigrationApplier;
pub use migrate::MigrationError;
pub use migrate::MigrationScript;
pub use restore::RestoreEngine;
pub use restore::RestoreError;
pub use restore::RestoreOptions;
pub use restore::RestoreReport;
pub use rotation::RotationConfig;
pub use rotation::RotationError;
pub use rotation::RotationOutcome;
pub use rotation::StorageRotationManager;
