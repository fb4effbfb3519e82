// crates/fleetstore-store-sqlite/src/metadata.rs
// ============================================================================
// Module: Shard Metadata Store
// Description: Reads and writes the JSON sidecar next to each shard file.
// Purpose: Let the rotation manager discover the active shard at startup
//          without opening or scanning the data files themselves.
// Dependencies: fleetstore-core, serde_json
// ============================================================================

//! ## Overview
//! Every shard file `<stem>.db` has a colocated sidecar `<stem>.meta.json`
//! holding its [`ShardMetadata`]. Sidecar writes go through a temp file and
//! an atomic rename because the active flag flips exactly when a rotation
//! commits. [`scan_shards`] rebuilds the directory view; a shard file
//! without a sidecar, or a sidecar naming the wrong file, is a corruption
//! signal rather than something to silently repair.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use fleetstore_core::ShardInfo;
use fleetstore_core::ShardMetadata;
use fleetstore_core::is_shard_filename;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Sidecar metadata errors.
#[derive(Debug, Error, Clone)]
pub enum MetadataError {
    /// Filesystem error touching a sidecar or scanning the directory.
    #[error("shard metadata io error: {0}")]
    Io(String),
    /// A sidecar exists but cannot be parsed.
    #[error("shard metadata parse error: {0}")]
    Parse(String),
    /// The directory violates a shard-set invariant.
    #[error("shard metadata corruption: {0}")]
    Corrupt(String),
}

// ============================================================================
// SECTION: Sidecar IO
// ============================================================================

/// Returns the sidecar path for a shard data file path.
#[must_use]
pub fn sidecar_path(shard_path: &Path) -> PathBuf {
    shard_path.with_extension("meta.json")
}

/// Reads a sidecar file.
///
/// # Errors
///
/// Returns [`MetadataError`] when the sidecar cannot be read or parsed.
pub fn read_metadata(sidecar: &Path) -> Result<ShardMetadata, MetadataError> {
    let raw = fs::read_to_string(sidecar).map_err(|err| MetadataError::Io(err.to_string()))?;
    serde_json::from_str(&raw).map_err(|err| MetadataError::Parse(err.to_string()))
}

/// Writes a shard's sidecar atomically (temp file + rename).
///
/// # Errors
///
/// Returns [`MetadataError`] when serialization or any filesystem step
/// fails.
pub fn write_metadata(shard_path: &Path, metadata: &ShardMetadata) -> Result<(), MetadataError> {
    let rendered = serde_json::to_vec_pretty(metadata)
        .map_err(|err| MetadataError::Parse(err.to_string()))?;
    let target = sidecar_path(shard_path);
    let temp_path = shard_path.with_extension("meta.json.tmp");
    {
        let mut file =
            fs::File::create(&temp_path).map_err(|err| MetadataError::Io(err.to_string()))?;
        file.write_all(&rendered).map_err(|err| MetadataError::Io(err.to_string()))?;
        file.sync_all().map_err(|err| MetadataError::Io(err.to_string()))?;
    }
    fs::rename(&temp_path, &target).map_err(|err| {
        let _ = fs::remove_file(&temp_path);
        MetadataError::Io(err.to_string())
    })
}

// ============================================================================
// SECTION: Directory Scan
// ============================================================================

/// Scans a directory for shard files and their sidecars, oldest first.
///
/// # Errors
///
/// Returns [`MetadataError`] when the directory cannot be read, a shard is
/// missing its sidecar, or a sidecar names a different file.
pub fn scan_shards(dir: &Path, prefix: &str) -> Result<Vec<ShardInfo>, MetadataError> {
    let entries = fs::read_dir(dir).map_err(|err| MetadataError::Io(err.to_string()))?;
    let mut shards = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| MetadataError::Io(err.to_string()))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !is_shard_filename(&name, prefix) {
            continue;
        }
        let path = entry.path();
        let sidecar = sidecar_path(&path);
        if !sidecar.exists() {
            return Err(MetadataError::Corrupt(format!("shard {name} has no sidecar")));
        }
        let metadata = read_metadata(&sidecar)?;
        if metadata.filename != name {
            return Err(MetadataError::Corrupt(format!(
                "sidecar of {name} names {:?}",
                metadata.filename
            )));
        }
        let size_bytes =
            fs::metadata(&path).map_err(|err| MetadataError::Io(err.to_string()))?.len();
        shards.push(ShardInfo {
            path,
            size_bytes,
            metadata,
        });
    }
    shards.sort_by(|a, b| a.metadata.created_at.cmp(&b.metadata.created_at));
    Ok(shards)
}

/// Returns the single active shard of a scanned set, if any.
///
/// # Errors
///
/// Returns [`MetadataError::Corrupt`] when more than one shard is flagged
/// active.
pub fn active_shard(shards: &[ShardInfo]) -> Result<Option<&ShardInfo>, MetadataError> {
    let mut active = None;
    for shard in shards {
        if shard.metadata.is_active {
            if active.is_some() {
                return Err(MetadataError::Corrupt(
                    "more than one shard is flagged active".to_string(),
                ));
            }
            active = Some(shard);
        }
    }
    Ok(active)
}
