// crates/fleetstore-store-sqlite/src/restore.rs
// ============================================================================
// Module: Restore Engine
// Description: Validated, staged restore of a backup bundle over the live
//              shard set.
// Purpose: Recover the store from a snapshot or archive without trusting
//          the bundle blindly.
// Dependencies: fleetstore-core, rusqlite, tempfile, zip
// ============================================================================

//! ## Overview
//! Restore never writes into the live shard directory until the bundle has
//! cleared two gates: manifest validation (shape, checksums, shard payloads
//! present) and staged verification (every shard re-hashed and passed
//! through `PRAGMA quick_check` from its staged copy). A failed gate aborts
//! with zero live writes. Before the first live write a safety snapshot of
//! the current shard set is taken, so even a restore that goes wrong
//! mid-apply leaves a recovery point.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use fleetstore_core::BackupManifest;
use fleetstore_core::BundleValidation;
use fleetstore_core::CURRENT_MANIFEST_VERSION;
use fleetstore_core::CancelToken;
use fleetstore_core::MANIFEST_FILENAME;
use fleetstore_core::SchemaVersion;
use fleetstore_core::is_shard_filename;
use fleetstore_core::sidecar_filename;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use tempfile::TempDir;
use thiserror::Error;
use zip::ZipArchive;

use crate::backup::BackupEngine;
use crate::backup::BackupError;
use crate::backup::DATABASES_DIR;
use crate::backup::PROFILE_DIR;
use crate::backup::copy_tree;
use crate::backup::hot_copy;
use crate::backup::sha256_file;
use crate::lock::MaintenanceLock;
use crate::metadata::MetadataError;
use crate::metadata::read_metadata;
use crate::metadata::sidecar_path;
use crate::metadata::write_metadata;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Restore engine errors.
#[derive(Debug, Error, Clone)]
pub enum RestoreError {
    /// The bundle failed validation; nothing was written.
    #[error("bundle validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    /// The caller did not confirm a destructive restore.
    #[error("restore requires explicit confirmation")]
    ConfirmationRequired,
    /// Another rotation, backup, or restore is in progress.
    #[error("restore refused: another maintenance operation is in progress")]
    OperationInProgress,
    /// The pre-restore safety snapshot failed.
    #[error("safety backup failed: {0}")]
    SafetyBackup(String),
    /// Filesystem error outside the live shard directory.
    #[error("restore io error: {0}")]
    Io(String),
    /// The archive could not be unpacked.
    #[error("archive extraction error: {0}")]
    Extraction(String),
    /// The operation was cancelled before any live write.
    #[error("restore cancelled")]
    Cancelled,
    /// Some shards were replaced before a failure; the live set is mixed.
    #[error("restore incomplete: {restored} of {total} shards replaced; {}", errors.join("; "))]
    Partial {
        /// Shards successfully replaced before the failure.
        restored: usize,
        /// Shards the bundle holds in total.
        total: usize,
        /// Per-shard failure descriptions.
        errors: Vec<String>,
    },
}

// ============================================================================
// SECTION: Options And Report
// ============================================================================

/// Caller-supplied restore options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Acknowledges that restore replaces the live shard set.
    pub confirmed: bool,
}

/// Outcome of a completed restore.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// Safety snapshot taken before the first live write, when one could
    /// be produced.
    pub safety_backup: Option<PathBuf>,
    /// Shard file names replaced from the bundle.
    pub restored_shards: Vec<String>,
    /// File name of the shard that is active after the restore.
    pub active_shard: Option<String>,
    /// Non-fatal observations gathered along the way.
    pub warnings: Vec<String>,
    /// Whether ancillary profile files were restored.
    pub profile_restored: bool,
}

// ============================================================================
// SECTION: Staging
// ============================================================================

/// A bundle staged as a plain directory, owning its scratch space when the
/// source was an archive.
struct StagedBundle {
    /// Directory holding `backup-metadata.json` and `databases/`.
    root: PathBuf,
    /// Scratch directory keeping an extracted archive alive; dropped (and
    /// deleted) with the staging handle.
    _scratch: Option<TempDir>,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Restores a validated backup bundle over the live shard set.
///
/// # Invariants
/// - No live file is written until every staged shard has passed checksum
///   and integrity verification.
/// - After a successful restore the live directory contains exactly the
///   bundle's shards; pre-existing extras are removed (the safety snapshot
///   preserves them).
pub struct RestoreEngine {
    /// Backup engine providing paths and the safety snapshot.
    backup: Arc<BackupEngine>,
    /// Schema version the running application expects.
    expected_schema_version: SchemaVersion,
    /// Advisory lock shared with rotation and backup.
    lock: MaintenanceLock,
}

impl RestoreEngine {
    /// Creates a restore engine sharing the backup engine's layout and the
    /// maintenance lock.
    #[must_use]
    pub fn new(
        backup: Arc<BackupEngine>,
        expected_schema_version: SchemaVersion,
        lock: MaintenanceLock,
    ) -> Self {
        Self {
            backup,
            expected_schema_version,
            lock,
        }
    }

    /// Validates a bundle without touching the live shard set.
    ///
    /// Content problems are reported inside the returned
    /// [`BundleValidation`], not as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError`] only for environment failures such as an
    /// unusable scratch directory.
    pub fn validate(&self, source: &Path) -> Result<BundleValidation, RestoreError> {
        let mut validation = BundleValidation::default();
        let staged = match self.stage(source, &mut validation)? {
            Some(staged) => staged,
            None => return Ok(validation),
        };
        self.inspect(&staged.root, &mut validation);
        Ok(validation)
    }

    /// Restores a bundle over the live shard set.
    ///
    /// The caller must reload the rotation manager afterwards so the write
    /// connection reopens on the restored active shard.
    ///
    /// # Errors
    ///
    /// Returns [`RestoreError`] when validation fails, confirmation is
    /// missing, another operation holds the lock, or the apply phase fails.
    pub fn restore(
        &self,
        source: &Path,
        options: RestoreOptions,
        cancel: &CancelToken,
    ) -> Result<RestoreReport, RestoreError> {
        let mut validation = BundleValidation::default();
        let staged = match self.stage(source, &mut validation)? {
            Some(staged) => staged,
            None => return Err(RestoreError::Validation(validation.errors)),
        };
        self.inspect(&staged.root, &mut validation);
        if !validation.is_valid() {
            return Err(RestoreError::Validation(validation.errors));
        }
        let Some(manifest) = validation.manifest.clone() else {
            return Err(RestoreError::Validation(validation.errors));
        };
        if !options.confirmed {
            return Err(RestoreError::ConfirmationRequired);
        }
        let _guard = self.lock.acquire().map_err(|_| RestoreError::OperationInProgress)?;
        if cancel.is_cancelled() {
            return Err(RestoreError::Cancelled);
        }

        let mut warnings = validation.warnings;
        // Staged integrity gate: every shard must open and pass quick_check
        // before the first live write.
        let databases = staged.root.join(DATABASES_DIR);
        for entry in &manifest.shards {
            verify_staged_shard(&databases.join(&entry.filename))
                .map_err(|message| RestoreError::Validation(vec![message]))?;
        }

        // Safety snapshot of whatever is live right now. A live set too
        // corrupt to enumerate must not block its own repair.
        let safety_backup = match self.backup.snapshot_auto(cancel) {
            Ok(record) => Some(record.path),
            Err(BackupError::Cancelled) => return Err(RestoreError::Cancelled),
            Err(BackupError::Metadata(MetadataError::Corrupt(message))) => {
                warnings
                    .push(format!("live set skipped safety backup (corrupt shard set): {message}"));
                None
            }
            Err(err) => return Err(RestoreError::SafetyBackup(err.to_string())),
        };

        if cancel.is_cancelled() {
            return Err(RestoreError::Cancelled);
        }

        let config = self.backup.config();
        let total = manifest.shards.len();
        let mut restored_shards = Vec::with_capacity(total);
        let mut errors = Vec::new();
        for entry in &manifest.shards {
            if cancel.is_cancelled() {
                errors.push(format!("cancelled before restoring {:?}", entry.filename));
                break;
            }
            match apply_shard(&databases, &config.shard_dir, &entry.filename, cancel) {
                Ok(()) => restored_shards.push(entry.filename.clone()),
                Err(message) => errors.push(message),
            }
        }

        // The bundle defines the complete shard set; live shards outside it
        // would leave stale data or a second active flag behind.
        let bundled: BTreeSet<&str> =
            manifest.shards.iter().map(|entry| entry.filename.as_str()).collect();
        match remove_extra_shards(&config.shard_dir, &config.shard_prefix, &bundled) {
            Ok(removed) => {
                for name in removed {
                    warnings.push(format!("removed live shard {name:?} not present in the bundle"));
                }
            }
            Err(message) => errors.push(message),
        }

        if !errors.is_empty() {
            return Err(RestoreError::Partial {
                restored: restored_shards.len(),
                total,
                errors,
            });
        }

        let profile_restored = restore_profile(&staged.root, &manifest, config.profile_dir.as_deref())
            .map_err(|err| RestoreError::Io(err.to_string()))?;

        Ok(RestoreReport {
            safety_backup,
            restored_shards,
            active_shard: manifest.active_shard().map(|entry| entry.filename.clone()),
            warnings,
            profile_restored,
        })
    }

    /// Stages a bundle as a plain directory, extracting archives into
    /// scratch space. Returns `None` (with errors recorded) when the source
    /// is not a usable bundle at all.
    fn stage(
        &self,
        source: &Path,
        validation: &mut BundleValidation,
    ) -> Result<Option<StagedBundle>, RestoreError> {
        if source.is_dir() {
            return Ok(Some(StagedBundle {
                root: source.to_path_buf(),
                _scratch: None,
            }));
        }
        if source.is_file() {
            let scratch = tempfile::Builder::new()
                .prefix(".restore-")
                .tempdir()
                .map_err(|err| RestoreError::Io(err.to_string()))?;
            if let Err(err) = extract_archive(source, scratch.path()) {
                validation.push_error(format!("unreadable archive: {err}"));
                return Ok(None);
            }
            return Ok(Some(StagedBundle {
                root: scratch.path().to_path_buf(),
                _scratch: Some(scratch),
            }));
        }
        validation.push_error(format!("backup bundle not found at {}", source.display()));
        Ok(None)
    }

    /// Checks a staged bundle directory: manifest shape, shard payloads,
    /// checksums, and compatibility.
    fn inspect(&self, root: &Path, validation: &mut BundleValidation) {
        let manifest_path = root.join(MANIFEST_FILENAME);
        let raw = match fs::read_to_string(&manifest_path) {
            Ok(raw) => raw,
            Err(_) => {
                validation.push_error("bundle has no backup-metadata.json manifest");
                return;
            }
        };
        let manifest: BackupManifest = match serde_json::from_str(&raw) {
            Ok(manifest) => manifest,
            Err(err) => {
                validation.push_error(format!("unparseable manifest: {err}"));
                return;
            }
        };
        if manifest.manifest_version > CURRENT_MANIFEST_VERSION {
            validation.push_error(format!(
                "manifest version {} is newer than supported version {CURRENT_MANIFEST_VERSION}",
                manifest.manifest_version
            ));
        }
        if manifest.shards.is_empty() {
            validation.push_error("manifest declares zero shards");
        }
        let active_count = manifest.shards.iter().filter(|entry| entry.is_active).count();
        if active_count > 1 {
            validation.push_error("manifest flags more than one shard active");
        } else if active_count == 0 && !manifest.shards.is_empty() {
            validation.push_warning("manifest flags no shard active");
        }
        if manifest.schema_version > self.expected_schema_version {
            validation.push_warning(format!(
                "bundle schema version {} is newer than the application's {}",
                manifest.schema_version, self.expected_schema_version
            ));
        }
        let databases = root.join(DATABASES_DIR);
        for entry in &manifest.shards {
            let shard_file = databases.join(&entry.filename);
            if !shard_file.is_file() {
                validation.push_error(format!("shard payload {:?} is missing", entry.filename));
                continue;
            }
            match sidecar_filename(&entry.filename) {
                Some(name) if databases.join(&name).is_file() => {}
                _ => {
                    validation.push_error(format!("shard {:?} has no sidecar", entry.filename));
                }
            }
            match sha256_file(&shard_file) {
                Ok(actual) if actual == entry.sha256 => {}
                Ok(_) => {
                    validation
                        .push_error(format!("shard {:?} fails its checksum", entry.filename));
                }
                Err(err) => validation.push_error(format!(
                    "shard {:?} could not be hashed: {err}",
                    entry.filename
                )),
            }
            if let Ok(meta) = fs::metadata(&shard_file)
                && meta.len() != entry.size_bytes
            {
                validation.push_warning(format!(
                    "shard {:?} size drifted from the manifest ({} vs {} bytes)",
                    entry.filename,
                    meta.len(),
                    entry.size_bytes
                ));
            }
        }
        if manifest.has_profile_data && !root.join(PROFILE_DIR).is_dir() {
            validation.push_warning("manifest promises profile data but the bundle has none");
        }
        validation.manifest = Some(manifest);
    }
}

// ============================================================================
// SECTION: Apply Phase
// ============================================================================

/// Opens a staged shard copy and runs `PRAGMA quick_check` on it.
fn verify_staged_shard(path: &Path) -> Result<(), String> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| format!("staged shard {} does not open: {err}", path.display()))?;
    let verdict: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .map_err(|err| format!("staged shard {} failed quick_check: {err}", path.display()))?;
    if verdict == "ok" {
        Ok(())
    } else {
        Err(format!("staged shard {} failed quick_check: {verdict}", path.display()))
    }
}

/// Replaces one live shard (data file plus sidecar) from its staged copy.
fn apply_shard(
    staged_databases: &Path,
    shard_dir: &Path,
    filename: &str,
    cancel: &CancelToken,
) -> Result<(), String> {
    let staged = staged_databases.join(filename);
    let live = shard_dir.join(filename);
    hot_copy(&staged, &live, cancel)
        .map_err(|err| format!("shard {filename:?} could not be restored: {err}"))?;
    let sidecar_name = sidecar_filename(filename)
        .ok_or_else(|| format!("shard {filename:?} has no sidecar name"))?;
    let metadata = read_metadata(&staged_databases.join(sidecar_name))
        .map_err(|err| format!("sidecar of {filename:?} could not be read: {err}"))?;
    write_metadata(&live, &metadata)
        .map_err(|err| format!("sidecar of {filename:?} could not be written: {err}"))
}

/// Removes live shard files absent from the restored bundle, with their
/// sidecars and WAL companions. Returns the removed shard names.
fn remove_extra_shards(
    shard_dir: &Path,
    prefix: &str,
    bundled: &BTreeSet<&str>,
) -> Result<Vec<String>, String> {
    let entries = fs::read_dir(shard_dir)
        .map_err(|err| format!("could not enumerate live shards: {err}"))?;
    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| format!("could not enumerate live shards: {err}"))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !is_shard_filename(&name, prefix) || bundled.contains(name.as_str()) {
            continue;
        }
        let path = entry.path();
        fs::remove_file(&path)
            .map_err(|err| format!("extra shard {name:?} could not be removed: {err}"))?;
        let _ = fs::remove_file(sidecar_path(&path));
        for suffix in ["-wal", "-shm"] {
            let mut companion = path.clone().into_os_string();
            companion.push(suffix);
            let _ = fs::remove_file(PathBuf::from(companion));
        }
        removed.push(name);
    }
    Ok(removed)
}

/// Copies bundled profile files back into the configured profile directory.
fn restore_profile(
    staged_root: &Path,
    manifest: &BackupManifest,
    profile_dir: Option<&Path>,
) -> Result<bool, BackupError> {
    let staged_profile = staged_root.join(PROFILE_DIR);
    match profile_dir {
        Some(target) if manifest.has_profile_data && staged_profile.is_dir() => {
            copy_tree(&staged_profile, target)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

// ============================================================================
// SECTION: Archive Extraction
// ============================================================================

/// Unpacks a zip archive into `dest`, rejecting entries whose paths escape
/// the destination.
fn extract_archive(archive_path: &Path, dest: &Path) -> Result<(), RestoreError> {
    let file = fs::File::open(archive_path).map_err(|err| RestoreError::Io(err.to_string()))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| RestoreError::Extraction(err.to_string()))?;
    for index in 0 .. archive.len() {
        let mut entry =
            archive.by_index(index).map_err(|err| RestoreError::Extraction(err.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(RestoreError::Extraction(format!(
                "entry {:?} escapes the archive root",
                entry.name()
            )));
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| RestoreError::Io(err.to_string()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| RestoreError::Io(err.to_string()))?;
        }
        let mut out = fs::File::create(&target).map_err(|err| RestoreError::Io(err.to_string()))?;
        io::copy(&mut entry, &mut out).map_err(|err| RestoreError::Io(err.to_string()))?;
    }
    Ok(())
}
