// crates/fleetstore-store-sqlite/src/rotation.rs
// ============================================================================
// Module: Storage Rotation Manager
// Description: Owns the active shard handle, rotates shards at size/row
//              thresholds, and propagates master tables into new shards.
// Purpose: Keep per-file backup/restore cost roughly constant by bounding
//          shard size regardless of total history.
// Dependencies: fleetstore-core, rusqlite, serde
// ============================================================================

//! ## Overview
//! The manager is constructed explicitly and injected where needed; there is
//! no global instance. It owns the single writable connection as an
//! `Arc<Mutex<Connection>>` so every clone of the handle observes a rotation
//! swap. A rotation builds the replacement shard in full (file plus complete
//! migration set) before any sidecar flips; a migration failure discards the
//! half-built file and leaves the old shard active. Master tables are then
//! copied from the sealed shard through a read-only `ATTACH`, with upsert
//! semantics so re-running a copy is a no-op, and per-table failures are
//! collected into the report instead of aborting the rotation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::mem;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use fleetstore_core::MasterCopyReport;
use fleetstore_core::MasterTableSpec;
use fleetstore_core::ShardInfo;
use fleetstore_core::ShardMetadata;
use fleetstore_core::TableCopyFailure;
use fleetstore_core::TableCopyStats;
use fleetstore_core::shard_filename;
use rusqlite::Connection;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::lock::MaintenanceLock;
use crate::metadata::MetadataError;
use crate::metadata::active_shard;
use crate::metadata::read_metadata;
use crate::metadata::scan_shards;
use crate::metadata::sidecar_path;
use crate::metadata::write_metadata;
use crate::migrate::MigrationApplier;
use crate::migrate::MigrationError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Alias under which the sealed shard is attached during master copies.
const HISTORY_ALIAS: &str = "hist";
/// Attempts at allocating a unique shard file name before giving up.
const SHARD_NAME_ATTEMPTS: i64 = 1_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration of the rotation manager.
///
/// # Invariants
/// - `shard_prefix` and `pressure_table` are validated identifiers.
/// - Thresholds are interpreted inclusively: a shard exactly at a threshold
///   is due for rotation.
#[derive(Debug, Clone, Deserialize)]
pub struct RotationConfig {
    /// Directory holding shard files and sidecars.
    pub shard_dir: PathBuf,
    /// Prefix of shard file names.
    #[serde(default = "default_shard_prefix")]
    pub shard_prefix: String,
    /// Table whose row count drives record-based rotation pressure.
    #[serde(default = "default_pressure_table")]
    pub pressure_table: String,
    /// Rotate when the active shard file reaches this many megabytes.
    #[serde(default = "default_size_threshold_mb")]
    pub size_threshold_mb: u64,
    /// Rotate when the pressure table reaches this many rows.
    #[serde(default = "default_record_threshold")]
    pub record_threshold: u64,
    /// Busy timeout applied to every shard connection (milliseconds).
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Returns the default shard file prefix.
fn default_shard_prefix() -> String {
    "fleet".to_string()
}

/// Returns the default pressure table name.
fn default_pressure_table() -> String {
    "trips".to_string()
}

/// Returns the default size threshold in megabytes.
const fn default_size_threshold_mb() -> u64 {
    100
}

/// Returns the default pressure-table row threshold.
const fn default_record_threshold() -> u64 {
    100_000
}

/// Returns the default busy timeout for shard connections.
const fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Returns whether an identifier is safe to splice into generated SQL.
fn identifier_is_valid(identifier: &str) -> bool {
    !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl RotationConfig {
    /// Validates config invariants.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::Invalid`] when an identifier or threshold is
    /// malformed.
    pub fn validate(&self) -> Result<(), RotationError> {
        if !identifier_is_valid(&self.pressure_table) {
            return Err(RotationError::Invalid(format!(
                "invalid pressure table name {:?}",
                self.pressure_table
            )));
        }
        if self.shard_prefix.is_empty() {
            return Err(RotationError::Invalid("shard_prefix must not be empty".to_string()));
        }
        if self.busy_timeout_ms == 0 {
            return Err(RotationError::Invalid(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Rotation manager errors.
#[derive(Debug, Error, Clone)]
pub enum RotationError {
    /// Filesystem error in the shard directory.
    #[error("rotation io error: {0}")]
    Io(String),
    /// `SQLite` engine error on a shard connection.
    #[error("rotation db error: {0}")]
    Db(String),
    /// Sidecar metadata error.
    #[error("rotation metadata error: {0}")]
    Metadata(#[from] MetadataError),
    /// Migration failure; fatal for the rotation attempt, the new shard is
    /// discarded and never adopted.
    #[error("rotation migration error: {0}")]
    Migration(#[from] MigrationError),
    /// The shard directory violates a shard-set invariant.
    #[error("rotation corruption: {0}")]
    Corrupt(String),
    /// Another rotation, backup, or restore is in progress.
    #[error("rotation refused: another maintenance operation is in progress")]
    OperationInProgress,
    /// Invalid configuration or input.
    #[error("rotation invalid input: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result of a completed rotation.
#[derive(Debug, Clone)]
pub struct RotationOutcome {
    /// The freshly created, now-active shard.
    pub new_shard: ShardInfo,
    /// The sealed shard the engine rotated away from.
    pub old_shard: ShardInfo,
    /// Per-table outcomes of the master-table propagation step.
    pub copy_report: MasterCopyReport,
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Owns the active shard handle and the rotation lifecycle.
///
/// # Invariants
/// - Exactly one sidecar in the shard directory is flagged active after
///   `initialize` and after every successful `rotate`.
/// - The connection inside the shared mutex always points at the shard the
///   active sidecar names.
pub struct StorageRotationManager {
    /// Manager configuration.
    config: RotationConfig,
    /// Shared ordered migration set.
    migrations: MigrationApplier,
    /// Advisory lock shared with backup and restore.
    lock: MaintenanceLock,
    /// The single writable connection, swapped in place on rotation.
    connection: Arc<Mutex<Connection>>,
    /// Path of the shard the connection currently points at.
    active_path: Mutex<PathBuf>,
}

impl StorageRotationManager {
    /// Scans the shard directory and opens (or bootstraps) the active shard.
    ///
    /// With no shards present, shard #1 is created with the full migration
    /// set and marked active. With an active shard present, it is opened
    /// and any pending migrations are applied. Sealed shards without an
    /// active sibling are a corruption signal, not a bootstrap case.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError`] when the directory cannot be scanned, the
    /// shard set is inconsistent, or migrations fail.
    pub fn initialize(
        config: RotationConfig,
        migrations: MigrationApplier,
        lock: MaintenanceLock,
    ) -> Result<Self, RotationError> {
        config.validate()?;
        fs::create_dir_all(&config.shard_dir).map_err(|err| RotationError::Io(err.to_string()))?;
        let shards = scan_shards(&config.shard_dir, &config.shard_prefix)?;
        let active = active_shard(&shards)?.cloned();
        match active {
            Some(shard) => {
                let mut conn = open_shard_connection(&shard.path, config.busy_timeout_ms)?;
                let applied = migrations.apply(&mut conn)?;
                if !applied.is_empty() {
                    let metadata = ShardMetadata {
                        schema_version: migrations.latest_version(),
                        ..shard.metadata.clone()
                    };
                    write_metadata(&shard.path, &metadata)?;
                }
                Ok(Self {
                    config,
                    migrations,
                    lock,
                    connection: Arc::new(Mutex::new(conn)),
                    active_path: Mutex::new(shard.path),
                })
            }
            None if shards.is_empty() => {
                let now = OffsetDateTime::now_utc();
                let (path, created_at) =
                    unique_shard_path(&config.shard_dir, &config.shard_prefix, now)?;
                let mut conn = open_shard_connection(&path, config.busy_timeout_ms)?;
                if let Err(err) = migrations.apply(&mut conn) {
                    drop(conn);
                    discard_shard_files(&path);
                    return Err(RotationError::Migration(err));
                }
                let metadata = ShardMetadata {
                    filename: path_filename(&path)?,
                    created_at,
                    is_active: true,
                    closed_at: None,
                    schema_version: migrations.latest_version(),
                };
                write_metadata(&path, &metadata)?;
                Ok(Self {
                    config,
                    migrations,
                    lock,
                    connection: Arc::new(Mutex::new(conn)),
                    active_path: Mutex::new(path),
                })
            }
            None => Err(RotationError::Corrupt(
                "shard directory has sealed shards but no active shard".to_string(),
            )),
        }
    }

    /// Returns the manager configuration.
    #[must_use]
    pub const fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Returns the shared handle to the active shard connection.
    ///
    /// Clones stay valid across rotations: the connection is swapped inside
    /// the mutex, never replaced wholesale.
    #[must_use]
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.connection)
    }

    /// Returns the active shard's current on-disk state.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError`] when the sidecar or file cannot be read.
    pub fn active_shard(&self) -> Result<ShardInfo, RotationError> {
        let path = self.active_path_snapshot()?;
        let metadata = read_metadata(&sidecar_path(&path))?;
        let size_bytes =
            fs::metadata(&path).map_err(|err| RotationError::Io(err.to_string()))?.len();
        Ok(ShardInfo {
            path,
            size_bytes,
            metadata,
        })
    }

    /// Enumerates all live shards, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError`] when the directory scan fails.
    pub fn shard_catalog(&self) -> Result<Vec<ShardInfo>, RotationError> {
        Ok(scan_shards(&self.config.shard_dir, &self.config.shard_prefix)?)
    }

    /// Returns whether the active shard is due for rotation under the
    /// configured thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError`] when shard size or row count cannot be
    /// determined.
    pub fn should_rotate(&self) -> Result<bool, RotationError> {
        self.should_rotate_with(self.config.size_threshold_mb, self.config.record_threshold)
    }

    /// Returns whether the active shard is due for rotation under explicit
    /// thresholds. A shard exactly at either threshold counts as due.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError`] when shard size or row count cannot be
    /// determined.
    pub fn should_rotate_with(
        &self,
        size_threshold_mb: u64,
        record_threshold: u64,
    ) -> Result<bool, RotationError> {
        let path = self.active_path_snapshot()?;
        let size_bytes =
            fs::metadata(&path).map_err(|err| RotationError::Io(err.to_string()))?.len();
        if size_bytes >= size_threshold_mb.saturating_mul(1024 * 1024) {
            return Ok(true);
        }
        Ok(self.pressure_rows()? >= record_threshold)
    }

    /// Counts rows of the pressure table; a missing table counts as zero.
    fn pressure_rows(&self) -> Result<u64, RotationError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| RotationError::Db("connection mutex poisoned".to_string()))?;
        let tables: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.config.pressure_table],
                |row| row.get(0),
            )
            .map_err(|err| RotationError::Db(err.to_string()))?;
        if tables == 0 {
            return Ok(0);
        }
        let rows: i64 = guard
            .query_row(
                &format!("SELECT COUNT(*) FROM \"{}\"", self.config.pressure_table),
                [],
                |row| row.get(0),
            )
            .map_err(|err| RotationError::Db(err.to_string()))?;
        Ok(u64::try_from(rows).unwrap_or(0))
    }

    /// Rotates to a fresh shard and propagates the declared master tables.
    ///
    /// The replacement shard receives the full migration set before any
    /// sidecar flips; a migration failure discards it and leaves the old
    /// shard active. Per-table copy failures do not abort the rotation and
    /// are reported in the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError`] on lock contention, migration failure, or
    /// a filesystem/sidecar error while committing the flip.
    pub fn rotate(&self, specs: &[MasterTableSpec]) -> Result<RotationOutcome, RotationError> {
        for spec in specs {
            spec.validate().map_err(|err| RotationError::Invalid(err.to_string()))?;
        }
        let _guard = self.lock.acquire().map_err(|_| RotationError::OperationInProgress)?;
        let old_path = self.active_path_snapshot()?;
        let old_metadata = read_metadata(&sidecar_path(&old_path))?;
        let now = OffsetDateTime::now_utc();
        let (new_path, created_at) =
            unique_shard_path(&self.config.shard_dir, &self.config.shard_prefix, now)?;
        let mut new_conn = open_shard_connection(&new_path, self.config.busy_timeout_ms)?;
        if let Err(err) = self.migrations.apply(&mut new_conn) {
            drop(new_conn);
            discard_shard_files(&new_path);
            return Err(RotationError::Migration(err));
        }
        {
            let mut live = self
                .connection
                .lock()
                .map_err(|_| RotationError::Db("connection mutex poisoned".to_string()))?;
            if let Err(err) = live.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
                drop(live);
                drop(new_conn);
                discard_shard_files(&new_path);
                return Err(RotationError::Db(err.to_string()));
            }
            let old_conn = mem::replace(&mut *live, new_conn);
            drop(live);
            // Dropping closes the sealed shard's write handle.
            drop(old_conn);
        }
        let sealed = ShardMetadata {
            is_active: false,
            closed_at: Some(now),
            ..old_metadata
        };
        write_metadata(&old_path, &sealed)?;
        let new_metadata = ShardMetadata {
            filename: path_filename(&new_path)?,
            created_at,
            is_active: true,
            closed_at: None,
            schema_version: self.migrations.latest_version(),
        };
        write_metadata(&new_path, &new_metadata)?;
        {
            let mut active = self
                .active_path
                .lock()
                .map_err(|_| RotationError::Db("active path mutex poisoned".to_string()))?;
            *active = new_path.clone();
        }
        let copy_report = self.copy_master_tables(&old_path, specs);
        let new_size =
            fs::metadata(&new_path).map_err(|err| RotationError::Io(err.to_string()))?.len();
        let old_size =
            fs::metadata(&old_path).map_err(|err| RotationError::Io(err.to_string()))?.len();
        Ok(RotationOutcome {
            new_shard: ShardInfo {
                path: new_path,
                size_bytes: new_size,
                metadata: new_metadata,
            },
            old_shard: ShardInfo {
                path: old_path,
                size_bytes: old_size,
                metadata: sealed,
            },
            copy_report,
        })
    }

    /// Re-scans the shard directory and reopens the active shard.
    ///
    /// Called after a restore replaced the shard set underneath the
    /// manager.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError`] on lock contention or when the restored
    /// directory has no single active shard.
    pub fn reload(&self) -> Result<ShardInfo, RotationError> {
        let _guard = self.lock.acquire().map_err(|_| RotationError::OperationInProgress)?;
        let shards = scan_shards(&self.config.shard_dir, &self.config.shard_prefix)?;
        let Some(active) = active_shard(&shards)?.cloned() else {
            return Err(RotationError::Corrupt("no active shard after reload".to_string()));
        };
        let new_conn = open_shard_connection(&active.path, self.config.busy_timeout_ms)?;
        {
            let mut live = self
                .connection
                .lock()
                .map_err(|_| RotationError::Db("connection mutex poisoned".to_string()))?;
            let old_conn = mem::replace(&mut *live, new_conn);
            drop(live);
            drop(old_conn);
        }
        {
            let mut path = self
                .active_path
                .lock()
                .map_err(|_| RotationError::Db("active path mutex poisoned".to_string()))?;
            *path = active.path.clone();
        }
        Ok(active)
    }

    /// Returns a snapshot of the active shard path.
    fn active_path_snapshot(&self) -> Result<PathBuf, RotationError> {
        Ok(self
            .active_path
            .lock()
            .map_err(|_| RotationError::Db("active path mutex poisoned".to_string()))?
            .clone())
    }

    /// Copies every declared master table from the sealed shard into the
    /// new active shard. Failures are collected per table; none abort.
    fn copy_master_tables(&self, source: &Path, specs: &[MasterTableSpec]) -> MasterCopyReport {
        let mut report = MasterCopyReport::default();
        if specs.is_empty() {
            return report;
        }
        let Ok(guard) = self.connection.lock() else {
            fail_all(&mut report, specs, "connection mutex poisoned");
            return report;
        };
        let uri = format!("file:{}?mode=ro", uri_escape_path(source));
        if let Err(err) =
            guard.execute(&format!("ATTACH DATABASE ?1 AS {HISTORY_ALIAS}"), params![uri])
        {
            fail_all(&mut report, specs, &format!("attach failed: {err}"));
            return report;
        }
        for spec in specs {
            match copy_one_table(&guard, spec) {
                Ok(stats) => report.copied.push(stats),
                Err(message) => report.failures.push(TableCopyFailure {
                    table_name: spec.table_name.clone(),
                    message,
                }),
            }
        }
        if let Err(err) = guard.execute(&format!("DETACH DATABASE {HISTORY_ALIAS}"), []) {
            report.failures.push(TableCopyFailure {
                table_name: HISTORY_ALIAS.to_string(),
                message: format!("detach failed: {err}"),
            });
        }
        report
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Escapes a filesystem path for use as a `file:` URI filename. `SQLite`
/// percent-decodes URI filenames and stops at `?`/`#`, so those characters
/// and literal `%` must be encoded.
fn uri_escape_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            '?' => escaped.push_str("%3F"),
            '#' => escaped.push_str("%23"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Opens a shard connection with WAL journaling and the configured timeout.
fn open_shard_connection(path: &Path, busy_timeout_ms: u64) -> Result<Connection, RotationError> {
    let conn = Connection::open(path).map_err(|err| RotationError::Db(err.to_string()))?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
        .map_err(|err| RotationError::Db(err.to_string()))?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
    )
    .map_err(|err| RotationError::Db(err.to_string()))?;
    Ok(conn)
}

/// Allocates a shard path whose timestamped name is not yet taken.
fn unique_shard_path(
    dir: &Path,
    prefix: &str,
    now: OffsetDateTime,
) -> Result<(PathBuf, OffsetDateTime), RotationError> {
    for offset_ms in 0 .. SHARD_NAME_ATTEMPTS {
        let stamp = now + time::Duration::milliseconds(offset_ms);
        let name =
            shard_filename(prefix, stamp).map_err(|err| RotationError::Invalid(err.to_string()))?;
        let candidate = dir.join(name);
        if !candidate.exists() {
            return Ok((candidate, stamp));
        }
    }
    Err(RotationError::Io("could not allocate a unique shard file name".to_string()))
}

/// Extracts a path's UTF-8 file name.
fn path_filename(path: &Path) -> Result<String, RotationError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| RotationError::Invalid(format!("shard path {} has no file name", path.display())))
}

/// Removes a discarded shard file plus its WAL companions, best effort.
fn discard_shard_files(path: &Path) {
    let _ = fs::remove_file(path);
    for suffix in ["-wal", "-shm"] {
        let mut companion = path.as_os_str().to_os_string();
        companion.push(suffix);
        let _ = fs::remove_file(PathBuf::from(companion));
    }
}

/// Marks every declared table as failed with one shared message.
fn fail_all(report: &mut MasterCopyReport, specs: &[MasterTableSpec], message: &str) {
    for spec in specs {
        report.failures.push(TableCopyFailure {
            table_name: spec.table_name.clone(),
            message: message.to_string(),
        });
    }
}

/// Copies one master table from the attached sealed shard.
fn copy_one_table(conn: &Connection, spec: &MasterTableSpec) -> Result<TableCopyStats, String> {
    let table = &spec.table_name;
    if spec.truncate_before_copy {
        conn.execute(&format!("DELETE FROM main.\"{table}\""), [])
            .map_err(|err| format!("truncate failed: {err}"))?;
    }
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .map_err(|err| err.to_string())?;
    let columns = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))
        .map_err(|err| err.to_string())?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| err.to_string())?;
    let columns: Vec<String> =
        columns.into_iter().filter(|column| !spec.exclude_columns.contains(column)).collect();
    if columns.is_empty() {
        return Err(format!("table {table:?} has no columns to copy"));
    }
    let column_list =
        columns.iter().map(|column| format!("\"{column}\"")).collect::<Vec<_>>().join(", ");
    let select = spec.custom_query.clone().unwrap_or_else(|| {
        format!("SELECT {column_list} FROM {HISTORY_ALIAS}.\"{table}\"")
    });
    let rows = conn
        .execute(&format!("INSERT OR REPLACE INTO main.\"{table}\" ({column_list}) {select}"), [])
        .map_err(|err| err.to_string())?;
    Ok(TableCopyStats {
        table_name: table.clone(),
        rows_copied: u64::try_from(rows).unwrap_or(0),
    })
}
