// crates/fleetstore-store-sqlite/src/backup.rs
// ============================================================================
// Module: Backup Engine
// Description: Hot, non-blocking snapshots of the full shard set with
//              retention pruning.
// Purpose: Produce crash-consistent backups while the application keeps
//          writing to the active shard.
// Dependencies: fleetstore-core, fleetstore-config, rusqlite, sha2, zip
// ============================================================================

//! ## Overview
//! A naive file copy of a live WAL-mode database is unsafe, so every shard
//! is streamed through `SQLite`'s page-level online-backup primitive from a
//! second, read-only handle; the live write handle is never touched and
//! writers are never blocked. Automatic backups land in a managed rotating
//! directory and are pruned FIFO to the configured retention; manual
//! backups are packaged into a single portable zip archive. Each bundle
//! carries a manifest with per-shard sizes, active flags, and SHA-256
//! checksums.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ffi::c_int;
use std::fs;
use std::io;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use fleetstore_config::BackupConfigStore;
use fleetstore_core::BackupKind;
use fleetstore_core::BackupManifest;
use fleetstore_core::CURRENT_MANIFEST_VERSION;
use fleetstore_core::CancelToken;
use fleetstore_core::MANIFEST_FILENAME;
use fleetstore_core::SchemaVersion;
use fleetstore_core::ShardEntry;
use fleetstore_core::sidecar_filename;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::backup::Backup;
use rusqlite::backup::StepResult;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::lock::MaintenanceLock;
use crate::metadata::MetadataError;
use crate::metadata::scan_shards;
use crate::metadata::sidecar_path;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Directory-name prefix of automatic backup snapshots.
pub const AUTO_BACKUP_PREFIX: &str = "auto_";
/// Bundle subdirectory holding shard copies and sidecars.
pub const DATABASES_DIR: &str = "databases";
/// Bundle subdirectory holding ancillary profile files.
pub const PROFILE_DIR: &str = "profile";
/// Pages streamed per online-backup step.
const COPY_PAGES_PER_STEP: c_int = 64;
/// Consecutive busy/locked steps tolerated before giving up.
const BUSY_RETRY_LIMIT: u32 = 50;
/// Pause between busy/locked retries.
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Attempts at allocating a unique snapshot directory name.
const SNAPSHOT_NAME_ATTEMPTS: i64 = 1_000;
/// Compact UTC timestamp embedded in snapshot directory names.
const SNAPSHOT_TIMESTAMP_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year][month][day]T[hour][minute][second][subsecond digits:3]");

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Backup engine errors.
#[derive(Debug, Error, Clone)]
pub enum BackupError {
    /// Filesystem error while assembling a bundle.
    #[error("backup io error: {0}")]
    Io(String),
    /// `SQLite` engine error during an online copy.
    #[error("backup db error: {0}")]
    Db(String),
    /// Shard sidecar error while enumerating the live set.
    #[error("backup metadata error: {0}")]
    Metadata(#[from] MetadataError),
    /// Archive packaging error.
    #[error("backup archive error: {0}")]
    Archive(String),
    /// Backup schedule configuration error.
    #[error("backup config error: {0}")]
    Config(String),
    /// The operation was cancelled between copy steps.
    #[error("backup cancelled")]
    Cancelled,
    /// Another rotation, backup, or restore is in progress.
    #[error("backup refused: another maintenance operation is in progress")]
    OperationInProgress,
    /// Invalid configuration or an empty shard set.
    #[error("backup invalid input: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration of the backup engine.
#[derive(Debug, Clone)]
pub struct BackupEngineConfig {
    /// Managed directory receiving automatic snapshots.
    pub backup_root: PathBuf,
    /// Directory holding the live shard set.
    pub shard_dir: PathBuf,
    /// Prefix of shard file names.
    pub shard_prefix: String,
    /// Optional directory of ancillary profile files, captured
    /// opportunistically.
    pub profile_dir: Option<PathBuf>,
    /// Application version stamped into manifests.
    pub app_version: String,
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// A backup bundle on disk: its location and parsed manifest.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    /// Snapshot directory or archive file.
    pub path: PathBuf,
    /// Manifest describing the bundle.
    pub manifest: BackupManifest,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Produces point-in-time, non-blocking snapshots of the full shard set.
///
/// # Invariants
/// - The live write handle is never opened or taken; every copy streams
///   from a separate read-only connection.
/// - Retention pruning deletes automatic snapshots only, never anything
///   outside the managed backup root.
pub struct BackupEngine {
    /// Engine configuration.
    config: BackupEngineConfig,
    /// Advisory lock shared with rotation and restore.
    lock: MaintenanceLock,
    /// Persistent backup schedule settings.
    config_store: BackupConfigStore,
}

impl BackupEngine {
    /// Creates a backup engine and its managed backup root.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] when the backup root cannot be created.
    pub fn new(
        config: BackupEngineConfig,
        config_store: BackupConfigStore,
        lock: MaintenanceLock,
    ) -> Result<Self, BackupError> {
        fs::create_dir_all(&config.backup_root).map_err(|err| BackupError::Io(err.to_string()))?;
        Ok(Self {
            config,
            lock,
            config_store,
        })
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &BackupEngineConfig {
        &self.config
    }

    /// Takes an automatic snapshot, prunes retention, and records the run.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] on lock contention or any snapshot failure.
    pub fn create_auto_backup(&self, cancel: &CancelToken) -> Result<BackupRecord, BackupError> {
        let _guard = self.lock.acquire().map_err(|_| BackupError::OperationInProgress)?;
        self.snapshot_auto(cancel)
    }

    /// Automatic snapshot body, shared with restore's safety backup (which
    /// already holds the maintenance lock).
    pub(crate) fn snapshot_auto(&self, cancel: &CancelToken) -> Result<BackupRecord, BackupError> {
        let now = OffsetDateTime::now_utc();
        let target = unique_snapshot_dir(&self.config.backup_root, now)?;
        fs::create_dir_all(&target).map_err(|err| BackupError::Io(err.to_string()))?;
        let manifest = match self.snapshot_into(&target, BackupKind::Auto, now, cancel) {
            Ok(manifest) => manifest,
            Err(err) => {
                let _ = fs::remove_dir_all(&target);
                return Err(err);
            }
        };
        let schedule =
            self.config_store.load().map_err(|err| BackupError::Config(err.to_string()))?;
        self.prune_auto_backups(schedule.keep_last_n)?;
        self.config_store
            .record_auto_backup(now)
            .map_err(|err| BackupError::Config(err.to_string()))?;
        Ok(BackupRecord {
            path: target,
            manifest,
        })
    }

    /// Packages the shard set into a single portable archive at `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] on lock contention or any snapshot or
    /// packaging failure.
    pub fn create_manual_backup(
        &self,
        dest: &Path,
        cancel: &CancelToken,
    ) -> Result<BackupRecord, BackupError> {
        let _guard = self.lock.acquire().map_err(|_| BackupError::OperationInProgress)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.config.backup_root)
            .map_err(|err| BackupError::Io(err.to_string()))?;
        let now = OffsetDateTime::now_utc();
        let manifest = self.snapshot_into(staging.path(), BackupKind::Manual, now, cancel)?;
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| BackupError::Io(err.to_string()))?;
        }
        zip_directory(staging.path(), dest)?;
        Ok(BackupRecord {
            path: dest.to_path_buf(),
            manifest,
        })
    }

    /// Runs one scheduler tick: snapshots iff an automatic backup is due.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] when the schedule cannot be read or a due
    /// backup fails.
    pub fn run_scheduled(
        &self,
        now: OffsetDateTime,
        cancel: &CancelToken,
    ) -> Result<Option<BackupRecord>, BackupError> {
        let schedule =
            self.config_store.load().map_err(|err| BackupError::Config(err.to_string()))?;
        if !schedule.is_due(now) {
            return Ok(None);
        }
        self.create_auto_backup(cancel).map(Some)
    }

    /// Enumerates automatic snapshots in the managed root, newest first.
    /// Snapshots without a parseable manifest are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] when the root or a manifest cannot be read.
    pub fn list_backups(&self) -> Result<Vec<BackupRecord>, BackupError> {
        let entries = fs::read_dir(&self.config.backup_root)
            .map_err(|err| BackupError::Io(err.to_string()))?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| BackupError::Io(err.to_string()))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(AUTO_BACKUP_PREFIX) || !entry.path().is_dir() {
                continue;
            }
            let manifest_path = entry.path().join(MANIFEST_FILENAME);
            if !manifest_path.exists() {
                // Half-written snapshot from an interrupted run; ignore it.
                continue;
            }
            let raw = fs::read_to_string(&manifest_path)
                .map_err(|err| BackupError::Io(err.to_string()))?;
            let Ok(manifest) = serde_json::from_str::<BackupManifest>(&raw) else {
                // Damaged manifest; skip the snapshot like a half-written
                // one so it never wedges pruning or future backups.
                continue;
            };
            records.push(BackupRecord {
                path: entry.path(),
                manifest,
            });
        }
        records.sort_by(|a, b| b.manifest.created_at.cmp(&a.manifest.created_at));
        Ok(records)
    }

    /// Deletes automatic snapshots beyond the retention count, oldest
    /// first. Returns the deleted paths.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError`] when a stale snapshot cannot be removed.
    pub fn prune_auto_backups(&self, keep_last_n: u32) -> Result<Vec<PathBuf>, BackupError> {
        let keep = usize::try_from(keep_last_n).unwrap_or(usize::MAX);
        let mut records = self.list_backups()?;
        let mut deleted = Vec::new();
        if records.len() > keep {
            for stale in records.split_off(keep) {
                if !stale.path.starts_with(&self.config.backup_root) {
                    return Err(BackupError::Invalid(format!(
                        "refusing to prune {} outside the backup root",
                        stale.path.display()
                    )));
                }
                fs::remove_dir_all(&stale.path).map_err(|err| BackupError::Io(err.to_string()))?;
                deleted.push(stale.path);
            }
        }
        Ok(deleted)
    }

    /// Streams every live shard plus sidecars and profile files into a
    /// bundle directory and writes its manifest.
    fn snapshot_into(
        &self,
        target: &Path,
        kind: BackupKind,
        now: OffsetDateTime,
        cancel: &CancelToken,
    ) -> Result<BackupManifest, BackupError> {
        let shards = scan_shards(&self.config.shard_dir, &self.config.shard_prefix)?;
        if shards.is_empty() {
            return Err(BackupError::Invalid("no shards to back up".to_string()));
        }
        let databases = target.join(DATABASES_DIR);
        fs::create_dir_all(&databases).map_err(|err| BackupError::Io(err.to_string()))?;
        let mut entries = Vec::with_capacity(shards.len());
        let mut total_size_bytes = 0_u64;
        let mut schema_version = SchemaVersion::ZERO;
        for shard in &shards {
            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }
            let dest = databases.join(shard.filename());
            hot_copy(&shard.path, &dest, cancel)?;
            let sidecar_name = sidecar_filename(shard.filename()).ok_or_else(|| {
                BackupError::Invalid(format!("shard {:?} has no sidecar name", shard.filename()))
            })?;
            fs::copy(sidecar_path(&shard.path), databases.join(sidecar_name))
                .map_err(|err| BackupError::Io(err.to_string()))?;
            let size_bytes =
                fs::metadata(&dest).map_err(|err| BackupError::Io(err.to_string()))?.len();
            entries.push(ShardEntry {
                filename: shard.filename().to_string(),
                size_bytes,
                is_active: shard.metadata.is_active,
                sha256: sha256_file(&dest)?,
            });
            total_size_bytes = total_size_bytes.saturating_add(size_bytes);
            schema_version = schema_version.max(shard.metadata.schema_version);
        }
        let has_profile_data = match &self.config.profile_dir {
            Some(profile) if profile.is_dir() => {
                copy_tree(profile, &target.join(PROFILE_DIR))?;
                true
            }
            _ => false,
        };
        let manifest = BackupManifest {
            manifest_version: CURRENT_MANIFEST_VERSION,
            schema_version,
            created_at: now,
            kind,
            shards: entries,
            has_profile_data,
            total_size_bytes,
            app_version: self.config.app_version.clone(),
        };
        write_manifest(target, &manifest)?;
        Ok(manifest)
    }
}

// ============================================================================
// SECTION: Online Copy
// ============================================================================

/// Streams a self-consistent copy of a live database file to `dest` via the
/// page-level online-backup primitive.
///
/// The source is opened read-only on a second handle; concurrent writers on
/// the live file are never blocked. Busy/locked steps back off and retry up
/// to a bounded limit.
pub(crate) fn hot_copy(
    source: &Path,
    dest: &Path,
    cancel: &CancelToken,
) -> Result<(), BackupError> {
    let src = Connection::open_with_flags(
        source,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| BackupError::Db(err.to_string()))?;
    let mut dst = Connection::open(dest).map_err(|err| BackupError::Db(err.to_string()))?;
    let backup = Backup::new(&src, &mut dst).map_err(|err| BackupError::Db(err.to_string()))?;
    let mut busy_steps = 0_u32;
    loop {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        match backup.step(COPY_PAGES_PER_STEP).map_err(|err| BackupError::Db(err.to_string()))? {
            StepResult::Done => return Ok(()),
            StepResult::More => busy_steps = 0,
            StepResult::Busy | StepResult::Locked => {
                busy_steps += 1;
                if busy_steps > BUSY_RETRY_LIMIT {
                    return Err(BackupError::Db(format!(
                        "online copy of {} stalled on a locked source",
                        source.display()
                    )));
                }
                thread::sleep(BUSY_RETRY_DELAY);
            }
            // StepResult is non-exhaustive upstream.
            result => {
                return Err(BackupError::Db(format!(
                    "online copy of {} returned an unexpected step result: {result:?}",
                    source.display()
                )));
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Allocates a snapshot directory whose timestamped name is not yet taken.
fn unique_snapshot_dir(root: &Path, now: OffsetDateTime) -> Result<PathBuf, BackupError> {
    for offset_ms in 0 .. SNAPSHOT_NAME_ATTEMPTS {
        let stamp = (now + time::Duration::milliseconds(offset_ms))
            .format(SNAPSHOT_TIMESTAMP_FORMAT)
            .map_err(|err| BackupError::Io(err.to_string()))?;
        let candidate = root.join(format!("{AUTO_BACKUP_PREFIX}{stamp}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(BackupError::Io("could not allocate a unique snapshot directory".to_string()))
}

/// Writes a bundle manifest atomically (temp file + rename).
pub(crate) fn write_manifest(target: &Path, manifest: &BackupManifest) -> Result<(), BackupError> {
    let rendered = serde_json::to_vec_pretty(manifest)
        .map_err(|err| BackupError::Archive(err.to_string()))?;
    let final_path = target.join(MANIFEST_FILENAME);
    let temp_path = target.join(format!("{MANIFEST_FILENAME}.tmp"));
    {
        let mut file =
            fs::File::create(&temp_path).map_err(|err| BackupError::Io(err.to_string()))?;
        file.write_all(&rendered).map_err(|err| BackupError::Io(err.to_string()))?;
        file.sync_all().map_err(|err| BackupError::Io(err.to_string()))?;
    }
    fs::rename(&temp_path, &final_path).map_err(|err| {
        let _ = fs::remove_file(&temp_path);
        BackupError::Io(err.to_string())
    })
}

/// Computes the hex SHA-256 of a file.
pub(crate) fn sha256_file(path: &Path) -> Result<String, BackupError> {
    let mut file = fs::File::open(path).map_err(|err| BackupError::Io(err.to_string()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(|err| BackupError::Io(err.to_string()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[.. read]);
    }
    Ok(hasher.finalize().iter().map(|byte| format!("{byte:02x}")).collect())
}

/// Recursively copies a directory tree.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<(), BackupError> {
    fs::create_dir_all(dst).map_err(|err| BackupError::Io(err.to_string()))?;
    let mut stack = vec![src.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|err| BackupError::Io(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| BackupError::Io(err.to_string()))?;
            let path = entry.path();
            let relative = path
                .strip_prefix(src)
                .map_err(|err| BackupError::Io(err.to_string()))?
                .to_path_buf();
            let target = dst.join(relative);
            if path.is_dir() {
                fs::create_dir_all(&target).map_err(|err| BackupError::Io(err.to_string()))?;
                stack.push(path);
            } else {
                fs::copy(&path, &target).map_err(|err| BackupError::Io(err.to_string()))?;
            }
        }
    }
    Ok(())
}

/// Packages a staged bundle directory into a single zip archive.
fn zip_directory(src: &Path, dest: &Path) -> Result<(), BackupError> {
    let file = fs::File::create(dest).map_err(|err| BackupError::Io(err.to_string()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    let mut stack = vec![src.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|err| BackupError::Io(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| BackupError::Io(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let relative =
                path.strip_prefix(src).map_err(|err| BackupError::Io(err.to_string()))?;
            let name = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            writer
                .start_file(name, options)
                .map_err(|err| BackupError::Archive(err.to_string()))?;
            let mut reader =
                fs::File::open(&path).map_err(|err| BackupError::Io(err.to_string()))?;
            io::copy(&mut reader, &mut writer).map_err(|err| BackupError::Io(err.to_string()))?;
        }
    }
    writer.finish().map_err(|err| BackupError::Archive(err.to_string()))?;
    Ok(())
}
