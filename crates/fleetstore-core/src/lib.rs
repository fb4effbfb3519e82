// crates/fleetstore-core/src/lib.rs
// ============================================================================
// Module: Fleetstore Core
// Description: Canonical data model for the storage lifecycle engine.
// Purpose: Provide shard, master-table, manifest, and schedule types shared
//          by the SQLite engine, the config store, and the CLI.
// Dependencies: serde, thiserror, time
// ============================================================================

//! ## Overview
//! Fleetstore rotates an embedded database across bounded-size shard files,
//! re-seeds master tables into every new shard, and takes hot backups of the
//! whole shard set. This crate holds the pure data model for those
//! operations: shard naming and sidecar metadata, master-table copy specs,
//! backup bundle manifests, the backup schedule configuration, and the
//! cancellation token threaded through long-running copies. No I/O happens
//! here; the engine lives in `fleetstore-store-sqlite`.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod cancel;
mod config;
mod manifest;
mod master;
mod shard;
mod version;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use cancel::CancelToken;
pub use config::BackupConfig;
pub use config::BackupFrequency;
pub use manifest::BackupKind;
pub use manifest::BackupManifest;
pub use manifest::BundleValidation;
pub use manifest::CURRENT_MANIFEST_VERSION;
pub use manifest::MANIFEST_FILENAME;
pub use manifest::ShardEntry;
pub use master::MasterCopyReport;
pub use master::MasterTableSpec;
pub use master::MasterTableSpecError;
pub use master::TableCopyFailure;
pub use master::TableCopyStats;
pub use shard::ShardInfo;
pub use shard::ShardMetadata;
pub use shard::ShardNameError;
pub use shard::is_shard_filename;
pub use shard::shard_filename;
pub use shard::sidecar_filename;
pub use version::SchemaVersion;
pub use version::SchemaVersionError;
