// crates/fleetstore-store-sqlite/tests/backup_restore_unit.rs
// ============================================================================
// Module: Backup And Restore Unit Tests
// Description: Snapshot, retention, validation, and restore round-trip
//              tests over a live shard set.
// Purpose: Validate hot-copy consistency, FIFO retention, bundle gates,
//          and zero-write behavior on rejected restores.
// ============================================================================

//! ## Overview
//! Unit-level tests for the backup and restore engines:
//! - Automatic snapshots carry a manifest with sizes and checksums
//! - Retention prunes oldest-first down to the configured count
//! - Manual backups land as a single zip archive that validates cleanly
//! - Tampered or incomplete bundles fail validation before any live write
//! - A full backup/restore round trip brings the store back to the
//!   snapshot's contents
//! - Cancellation and lock contention are surfaced, not swallowed

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use fleetstore_config::BackupConfigStore;
use fleetstore_core::BackupConfig;
use fleetstore_core::BackupKind;
use fleetstore_core::CancelToken;
use fleetstore_core::MANIFEST_FILENAME;
use fleetstore_store_sqlite::AUTO_BACKUP_PREFIX;
use fleetstore_store_sqlite::BackupEngine;
use fleetstore_store_sqlite::BackupEngineConfig;
use fleetstore_store_sqlite::BackupError;
use fleetstore_store_sqlite::DATABASES_DIR;
use fleetstore_store_sqlite::MaintenanceLock;
use fleetstore_store_sqlite::MigrationApplier;
use fleetstore_store_sqlite::RestoreEngine;
use fleetstore_store_sqlite::RestoreError;
use fleetstore_store_sqlite::RestoreOptions;
use fleetstore_store_sqlite::RotationConfig;
use fleetstore_store_sqlite::StorageRotationManager;
use tempfile::TempDir;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Fixture
// ============================================================================

const SCHEMA_SQL: &str = "CREATE TABLE drivers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE trips (
    id INTEGER PRIMARY KEY,
    driver_id INTEGER NOT NULL
);";

/// One live store with its manager and both lifecycle engines wired over a
/// shared maintenance lock.
struct Fixture {
    root: TempDir,
    lock: MaintenanceLock,
    manager: StorageRotationManager,
    backup: Arc<BackupEngine>,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().expect("tempdir");
        let migrations_dir = root.path().join("migrations");
        fs::create_dir_all(&migrations_dir).expect("migrations dir");
        fs::write(migrations_dir.join("1.0.0_schema.sql"), SCHEMA_SQL).expect("write script");
        let lock = MaintenanceLock::new();
        let migrations = MigrationApplier::load(&migrations_dir).expect("load migrations");
        let config = RotationConfig {
            shard_dir: root.path().join("shards"),
            shard_prefix: "fleet".to_string(),
            pressure_table: "trips".to_string(),
            size_threshold_mb: 10_000,
            record_threshold: u64::MAX,
            busy_timeout_ms: 1_000,
        };
        let manager = StorageRotationManager::initialize(config, migrations, lock.clone())
            .expect("initialize");
        let backup = Arc::new(
            BackupEngine::new(
                BackupEngineConfig {
                    backup_root: root.path().join("backups"),
                    shard_dir: root.path().join("shards"),
                    shard_prefix: "fleet".to_string(),
                    profile_dir: None,
                    app_version: "0.1.0".to_string(),
                },
                BackupConfigStore::new(root.path().join("backup-schedule.toml")),
                lock.clone(),
            )
            .expect("backup engine"),
        );
        Self {
            root,
            lock,
            manager,
            backup,
        }
    }

    fn restore_engine(&self) -> RestoreEngine {
        let migrations =
            MigrationApplier::load(&self.root.path().join("migrations")).expect("load migrations");
        RestoreEngine::new(
            Arc::clone(&self.backup),
            migrations.latest_version(),
            self.lock.clone(),
        )
    }

    fn schedule_store(&self) -> BackupConfigStore {
        BackupConfigStore::new(self.root.path().join("backup-schedule.toml"))
    }

    fn exec(&self, sql: &str) {
        let conn = self.manager.connection();
        let guard = conn.lock().expect("connection lock");
        guard.execute_batch(sql).expect("execute");
    }

    fn count(&self, sql: &str) -> i64 {
        let conn = self.manager.connection();
        let guard = conn.lock().expect("connection lock");
        guard.query_row(sql, [], |row| row.get(0)).expect("query")
    }

    fn auto_snapshot_count(&self) -> usize {
        fs::read_dir(self.root.path().join("backups"))
            .expect("read backups")
            .filter_map(Result::ok)
            .filter(|entry| {
                entry.file_name().to_string_lossy().starts_with(AUTO_BACKUP_PREFIX)
                    && entry.path().is_dir()
            })
            .count()
    }
}

// ============================================================================
// SECTION: Backup
// ============================================================================

#[test]
fn auto_backup_carries_manifest_with_checksums() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a'), (2, 'b');");
    let record = fixture.backup.create_auto_backup(&CancelToken::new()).expect("backup");
    assert_eq!(record.manifest.kind, BackupKind::Auto);
    assert_eq!(record.manifest.shards.len(), 1);
    let entry = &record.manifest.shards[0];
    assert!(entry.is_active);
    assert_eq!(entry.sha256.len(), 64);
    assert_eq!(record.manifest.schema_version.to_string(), "1.0.0");
    let copied = record.path.join(DATABASES_DIR).join(&entry.filename);
    assert_eq!(fs::metadata(&copied).expect("copied shard").len(), entry.size_bytes);
    assert!(record.path.join(MANIFEST_FILENAME).exists());
}

#[test]
fn backup_does_not_disturb_the_live_write_handle() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a');");
    fixture.backup.create_auto_backup(&CancelToken::new()).expect("backup");
    // Writes continue on the same handle afterwards.
    fixture.exec("INSERT INTO drivers (id, name) VALUES (2, 'b');");
    assert_eq!(fixture.count("SELECT COUNT(*) FROM drivers"), 2);
}

#[test]
fn retention_prunes_oldest_snapshots_first() {
    let fixture = Fixture::new();
    fixture
        .schedule_store()
        .save(&BackupConfig {
            keep_last_n: 5,
            ..BackupConfig::default()
        })
        .expect("save schedule");
    for _ in 0 .. 8 {
        fixture.backup.create_auto_backup(&CancelToken::new()).expect("backup");
    }
    assert_eq!(fixture.auto_snapshot_count(), 5);
    let records = fixture.backup.list_backups().expect("list");
    assert_eq!(records.len(), 5);
    // Newest first.
    for pair in records.windows(2) {
        assert!(pair[0].manifest.created_at >= pair[1].manifest.created_at);
    }
}

#[test]
fn damaged_manifest_does_not_wedge_future_backups() {
    let fixture = Fixture::new();
    let record = fixture.backup.create_auto_backup(&CancelToken::new()).expect("first backup");
    fs::write(record.path.join(MANIFEST_FILENAME), "{not json").expect("damage manifest");
    // The damaged snapshot is skipped, not fatal.
    assert!(fixture.backup.list_backups().expect("list").is_empty());
    fixture.backup.create_auto_backup(&CancelToken::new()).expect("second backup");
    assert_eq!(fixture.backup.list_backups().expect("list").len(), 1);
}

#[test]
fn auto_backup_records_the_run_in_the_schedule() {
    let fixture = Fixture::new();
    assert!(fixture.schedule_store().load().expect("load").last_auto_backup_at.is_none());
    fixture.backup.create_auto_backup(&CancelToken::new()).expect("backup");
    assert!(fixture.schedule_store().load().expect("load").last_auto_backup_at.is_some());
}

#[test]
fn scheduler_skips_when_not_due() {
    let fixture = Fixture::new();
    fixture
        .schedule_store()
        .save(&BackupConfig {
            auto_backup_enabled: false,
            ..BackupConfig::default()
        })
        .expect("save schedule");
    let outcome = fixture
        .backup
        .run_scheduled(OffsetDateTime::now_utc(), &CancelToken::new())
        .expect("tick");
    assert!(outcome.is_none());
    assert_eq!(fixture.auto_snapshot_count(), 0);
}

#[test]
fn scheduler_fires_on_the_first_ever_tick() {
    let fixture = Fixture::new();
    let outcome = fixture
        .backup
        .run_scheduled(OffsetDateTime::now_utc(), &CancelToken::new())
        .expect("tick");
    assert!(outcome.is_some());
    assert_eq!(fixture.auto_snapshot_count(), 1);
}

#[test]
fn manual_backup_lands_as_a_single_archive() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a');");
    let dest = fixture.root.path().join("exports").join("fleet-backup.zip");
    let record =
        fixture.backup.create_manual_backup(&dest, &CancelToken::new()).expect("manual backup");
    assert_eq!(record.manifest.kind, BackupKind::Manual);
    assert!(dest.is_file());
    // Staging is cleaned up; nothing but the archive and the managed root.
    assert_eq!(fixture.auto_snapshot_count(), 0);
    // The archive round-trips through validation.
    let validation = fixture.restore_engine().validate(&dest).expect("validate");
    assert!(validation.is_valid(), "errors: {:?}", validation.errors);
}

#[test]
fn cancelled_backup_leaves_no_partial_snapshot() {
    let fixture = Fixture::new();
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = fixture.backup.create_auto_backup(&cancel);
    assert!(matches!(result, Err(BackupError::Cancelled)));
    assert_eq!(fixture.auto_snapshot_count(), 0);
}

#[test]
fn backup_is_refused_while_maintenance_is_in_progress() {
    let fixture = Fixture::new();
    let _guard = fixture.lock.acquire().expect("hold lock");
    let result = fixture.backup.create_auto_backup(&CancelToken::new());
    assert!(matches!(result, Err(BackupError::OperationInProgress)));
}

// ============================================================================
// SECTION: Validation
// ============================================================================

#[test]
fn snapshot_directory_validates_cleanly() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a');");
    let record = fixture.backup.create_auto_backup(&CancelToken::new()).expect("backup");
    let validation = fixture.restore_engine().validate(&record.path).expect("validate");
    assert!(validation.is_valid(), "errors: {:?}", validation.errors);
    assert!(validation.manifest.is_some());
}

#[test]
fn missing_bundle_and_missing_manifest_fail_validation() {
    let fixture = Fixture::new();
    let engine = fixture.restore_engine();
    let absent = fixture.root.path().join("no-such-bundle");
    let validation = engine.validate(&absent).expect("validate");
    assert!(!validation.is_valid());

    let empty = fixture.root.path().join("empty-bundle");
    fs::create_dir_all(&empty).expect("mkdir");
    let validation = engine.validate(&empty).expect("validate");
    assert!(!validation.is_valid());
    assert!(validation.errors.iter().any(|error| error.contains("manifest")));
}

#[test]
fn tampered_shard_payload_fails_its_checksum() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a');");
    let record = fixture.backup.create_auto_backup(&CancelToken::new()).expect("backup");
    let shard_name = record.manifest.shards[0].filename.clone();
    let payload = record.path.join(DATABASES_DIR).join(&shard_name);
    let mut file = OpenOptions::new().append(true).open(&payload).expect("open payload");
    file.write_all(b"garbage").expect("tamper");
    drop(file);
    let validation = fixture.restore_engine().validate(&record.path).expect("validate");
    assert!(!validation.is_valid());
    assert!(validation.errors.iter().any(|error| error.contains("checksum")));
}

// ============================================================================
// SECTION: Restore
// ============================================================================

fn live_shard_names(shard_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(shard_dir)
        .expect("read shards")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".db"))
        .collect();
    names.sort();
    names
}

#[test]
fn round_trip_restore_returns_to_the_snapshot_contents() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a'), (2, 'b');");
    let record = fixture.backup.create_auto_backup(&CancelToken::new()).expect("backup");
    // Diverge after the snapshot.
    fixture.exec("INSERT INTO drivers (id, name) VALUES (3, 'c');");
    assert_eq!(fixture.count("SELECT COUNT(*) FROM drivers"), 3);

    let report = fixture
        .restore_engine()
        .restore(
            &record.path,
            RestoreOptions {
                confirmed: true,
            },
            &CancelToken::new(),
        )
        .expect("restore");
    assert!(report.safety_backup.is_some());
    assert_eq!(report.restored_shards.len(), 1);
    assert!(report.active_shard.is_some());

    fixture.manager.reload().expect("reload");
    assert_eq!(fixture.count("SELECT COUNT(*) FROM drivers"), 2);
}

#[test]
fn restore_from_a_manual_archive_round_trips_too() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a');");
    let dest = fixture.root.path().join("fleet-backup.zip");
    fixture.backup.create_manual_backup(&dest, &CancelToken::new()).expect("manual backup");
    fixture.exec("DELETE FROM drivers;");

    fixture
        .restore_engine()
        .restore(
            &dest,
            RestoreOptions {
                confirmed: true,
            },
            &CancelToken::new(),
        )
        .expect("restore");
    fixture.manager.reload().expect("reload");
    assert_eq!(fixture.count("SELECT COUNT(*) FROM drivers"), 1);
}

#[test]
fn unconfirmed_restore_is_refused_after_validation() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a');");
    let record = fixture.backup.create_auto_backup(&CancelToken::new()).expect("backup");
    let result = fixture.restore_engine().restore(
        &record.path,
        RestoreOptions::default(),
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(RestoreError::ConfirmationRequired)));
}

#[test]
fn invalid_bundle_aborts_with_zero_live_writes() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a');");
    let shard_dir = fixture.root.path().join("shards");
    let before = live_shard_names(&shard_dir);

    let empty = fixture.root.path().join("empty-bundle");
    fs::create_dir_all(&empty).expect("mkdir");
    let result = fixture.restore_engine().restore(
        &empty,
        RestoreOptions {
            confirmed: true,
        },
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(RestoreError::Validation(_))));
    assert_eq!(live_shard_names(&shard_dir), before);
    assert_eq!(fixture.count("SELECT COUNT(*) FROM drivers"), 1);
}

#[test]
fn pre_cancelled_restore_never_touches_the_live_set() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a');");
    let record = fixture.backup.create_auto_backup(&CancelToken::new()).expect("backup");
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = fixture.restore_engine().restore(
        &record.path,
        RestoreOptions {
            confirmed: true,
        },
        &cancel,
    );
    assert!(matches!(result, Err(RestoreError::Cancelled)));
    assert_eq!(fixture.count("SELECT COUNT(*) FROM drivers"), 1);
}

#[test]
fn restore_is_refused_while_maintenance_is_in_progress() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a');");
    let record = fixture.backup.create_auto_backup(&CancelToken::new()).expect("backup");
    let _guard = fixture.lock.acquire().expect("hold lock");
    let result = fixture.restore_engine().restore(
        &record.path,
        RestoreOptions {
            confirmed: true,
        },
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(RestoreError::OperationInProgress)));
}

#[test]
fn restore_removes_live_shards_absent_from_the_bundle() {
    let fixture = Fixture::new();
    fixture.exec("INSERT INTO drivers (id, name) VALUES (1, 'a');");
    let record = fixture.backup.create_auto_backup(&CancelToken::new()).expect("backup");
    // Rotation after the snapshot adds a second live shard.
    fixture.manager.rotate(&[]).expect("rotate");
    let shard_dir = fixture.root.path().join("shards");
    assert_eq!(live_shard_names(&shard_dir).len(), 2);

    let report = fixture
        .restore_engine()
        .restore(
            &record.path,
            RestoreOptions {
                confirmed: true,
            },
            &CancelToken::new(),
        )
        .expect("restore");
    assert_eq!(live_shard_names(&shard_dir).len(), 1);
    assert!(report.warnings.iter().any(|warning| warning.contains("not present in the bundle")));
    fixture.manager.reload().expect("reload");
    assert_eq!(fixture.count("SELECT COUNT(*) FROM drivers"), 1);
}
