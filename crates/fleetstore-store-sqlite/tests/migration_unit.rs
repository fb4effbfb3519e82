// crates/fleetstore-store-sqlite/tests/migration_unit.rs
// ============================================================================
// Module: Migration Applier Unit Tests
// Description: Script discovery, ordering, and per-shard application tests.
// Purpose: Validate version ordering, idempotence, and transactional
//          failure behavior of the migration applier.
// ============================================================================

//! ## Overview
//! Unit-level tests for the migration applier:
//! - Script discovery sorts semantically and ignores non-SQL entries
//! - Malformed names and duplicate versions are rejected outright
//! - Application is idempotent and recorded in the control table
//! - A failing script leaves the shard at the last fully applied version

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
use std::path::Path;

use fleetstore_core::SchemaVersion;
use fleetstore_store_sqlite::MigrationApplier;
use fleetstore_store_sqlite::MigrationError;
use rusqlite::Connection;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn write_script(dir: &Path, name: &str, sql: &str) {
    fs::write(dir.join(name), sql).expect("write script");
}

fn version(raw: &str) -> SchemaVersion {
    raw.parse().expect("version")
}

fn table_exists(conn: &Connection, table: &str) -> bool {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .expect("query");
    count == 1
}

// ============================================================================
// SECTION: Discovery
// ============================================================================

#[test]
fn scripts_sort_by_semantic_version_not_lexically() {
    let dir = TempDir::new().expect("tempdir");
    write_script(dir.path(), "1.10.0_later.sql", "CREATE TABLE later (id INTEGER);");
    write_script(dir.path(), "1.2.0_earlier.sql", "CREATE TABLE earlier (id INTEGER);");
    write_script(dir.path(), "1.0.0_init.sql", "CREATE TABLE init (id INTEGER);");
    let applier = MigrationApplier::load(dir.path()).expect("load");
    let versions: Vec<_> = applier.scripts().iter().map(|script| script.version).collect();
    assert_eq!(versions, vec![version("1.0.0"), version("1.2.0"), version("1.10.0")]);
    assert_eq!(applier.latest_version(), version("1.10.0"));
}

#[test]
fn non_sql_entries_are_ignored() {
    let dir = TempDir::new().expect("tempdir");
    write_script(dir.path(), "1.0.0_init.sql", "CREATE TABLE init (id INTEGER);");
    fs::write(dir.path().join("README.md"), "notes").expect("write");
    fs::write(dir.path().join("1.0.0_init.sql.bak"), "old").expect("write");
    let applier = MigrationApplier::load(dir.path()).expect("load");
    assert_eq!(applier.scripts().len(), 1);
}

#[test]
fn malformed_sql_names_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    write_script(dir.path(), "init.sql", "CREATE TABLE init (id INTEGER);");
    assert!(matches!(
        MigrationApplier::load(dir.path()),
        Err(MigrationError::InvalidName(_, _))
    ));
}

#[test]
fn duplicate_versions_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    write_script(dir.path(), "1.0.0_a.sql", "CREATE TABLE a (id INTEGER);");
    write_script(dir.path(), "1.0.0_b.sql", "CREATE TABLE b (id INTEGER);");
    assert!(matches!(
        MigrationApplier::load(dir.path()),
        Err(MigrationError::DuplicateVersion(_))
    ));
}

#[test]
fn empty_folder_reports_version_zero() {
    let dir = TempDir::new().expect("tempdir");
    let applier = MigrationApplier::load(dir.path()).expect("load");
    assert_eq!(applier.latest_version(), SchemaVersion::ZERO);
}

// ============================================================================
// SECTION: Application
// ============================================================================

#[test]
fn apply_runs_every_script_once_and_records_versions() {
    let dir = TempDir::new().expect("tempdir");
    write_script(dir.path(), "1.0.0_drivers.sql", "CREATE TABLE drivers (id INTEGER PRIMARY KEY);");
    write_script(
        dir.path(),
        "1.1.0_trips.sql",
        "CREATE TABLE trips (id INTEGER PRIMARY KEY, driver_id INTEGER);",
    );
    let applier = MigrationApplier::load(dir.path()).expect("load");
    let mut conn = Connection::open_in_memory().expect("open");
    let applied = applier.apply(&mut conn).expect("apply");
    assert_eq!(applied, vec![version("1.0.0"), version("1.1.0")]);
    assert!(table_exists(&conn, "drivers"));
    assert!(table_exists(&conn, "trips"));
    let recorded: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
        .expect("count");
    assert_eq!(recorded, 2);
}

#[test]
fn apply_is_idempotent_per_shard() {
    let dir = TempDir::new().expect("tempdir");
    write_script(dir.path(), "1.0.0_drivers.sql", "CREATE TABLE drivers (id INTEGER PRIMARY KEY);");
    let applier = MigrationApplier::load(dir.path()).expect("load");
    let mut conn = Connection::open_in_memory().expect("open");
    assert_eq!(applier.apply(&mut conn).expect("first").len(), 1);
    assert!(applier.apply(&mut conn).expect("second").is_empty());
}

#[test]
fn newly_added_script_applies_on_top_of_an_existing_shard() {
    let dir = TempDir::new().expect("tempdir");
    write_script(dir.path(), "1.0.0_drivers.sql", "CREATE TABLE drivers (id INTEGER PRIMARY KEY);");
    let mut conn = Connection::open_in_memory().expect("open");
    MigrationApplier::load(dir.path()).expect("load").apply(&mut conn).expect("first");
    write_script(
        dir.path(),
        "1.1.0_trips.sql",
        "CREATE TABLE trips (id INTEGER PRIMARY KEY);",
    );
    let applied =
        MigrationApplier::load(dir.path()).expect("reload").apply(&mut conn).expect("second");
    assert_eq!(applied, vec![version("1.1.0")]);
    assert!(table_exists(&conn, "trips"));
}

#[test]
fn failing_script_leaves_the_shard_at_the_previous_version() {
    let dir = TempDir::new().expect("tempdir");
    write_script(dir.path(), "1.0.0_drivers.sql", "CREATE TABLE drivers (id INTEGER PRIMARY KEY);");
    write_script(dir.path(), "1.1.0_broken.sql", "CREATE BORKED SYNTAX;");
    let applier = MigrationApplier::load(dir.path()).expect("load");
    let mut conn = Connection::open_in_memory().expect("open");
    let err = applier.apply(&mut conn).expect_err("must fail");
    assert!(matches!(err, MigrationError::Db { version, .. } if version == self::version("1.1.0")));
    // The first script stays applied; the broken one left no record.
    assert!(table_exists(&conn, "drivers"));
    let recorded: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
        .expect("count");
    assert_eq!(recorded, 1);
}
