// crates/fleetstore-store-sqlite/src/migrate.rs
// ============================================================================
// Module: Migration Applier
// Description: Applies versioned schema scripts to a single shard.
// Purpose: Give every shard the full current schema from scratch; shards are
//          independent schemas, not incremental diffs of one another.
// Dependencies: fleetstore-core, rusqlite
// ============================================================================

//! ## Overview
//! Migration scripts live in one folder shared by all shards, named
//! `<major.minor.patch>_<description>.sql`. The applier sorts them by
//! semantic version, applies every script above the shard's highest
//! recorded version inside its own transaction, and records each applied
//! version in the `schema_migrations` control table. Re-invoking against an
//! already-migrated shard is a no-op.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use fleetstore_core::SchemaVersion;
use rusqlite::Connection;
use rusqlite::params;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// DDL for the per-shard control table recording applied versions.
const CONTROL_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at INTEGER NOT NULL
)";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Migration errors.
#[derive(Debug, Error, Clone)]
pub enum MigrationError {
    /// Filesystem error reading the scripts folder.
    #[error("migration io error: {0}")]
    Io(String),
    /// A script file name does not follow `<version>_<description>.sql`.
    #[error("invalid migration script name {0:?}: {1}")]
    InvalidName(String, String),
    /// Two scripts declare the same version.
    #[error("duplicate migration version {0}")]
    DuplicateVersion(SchemaVersion),
    /// The database rejected a script or a control-table statement.
    #[error("migration db error applying {version}: {message}")]
    Db {
        /// Version of the script that failed (zero for control-table setup).
        version: SchemaVersion,
        /// Database error description.
        message: String,
    },
}

// ============================================================================
// SECTION: Scripts
// ============================================================================

/// One versioned schema script discovered in the scripts folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    /// Version parsed from the file name.
    pub version: SchemaVersion,
    /// Description parsed from the file name.
    pub description: String,
    /// Path of the `.sql` file.
    pub path: PathBuf,
}

/// Parses `<major.minor.patch>_<description>.sql` into its parts.
fn parse_script_name(name: &str) -> Result<(SchemaVersion, String), MigrationError> {
    let stem = name.strip_suffix(".sql").ok_or_else(|| {
        MigrationError::InvalidName(name.to_string(), "missing .sql suffix".to_string())
    })?;
    let (version_raw, description) = stem.split_once('_').ok_or_else(|| {
        MigrationError::InvalidName(name.to_string(), "missing '_' separator".to_string())
    })?;
    let version = version_raw
        .parse::<SchemaVersion>()
        .map_err(|err| MigrationError::InvalidName(name.to_string(), err.to_string()))?;
    if description.is_empty() {
        return Err(MigrationError::InvalidName(name.to_string(), "empty description".to_string()));
    }
    Ok((version, description.to_string()))
}

// ============================================================================
// SECTION: Applier
// ============================================================================

/// Applies the shared ordered migration set to individual shards.
///
/// # Invariants
/// - Scripts are sorted ascending by version with no duplicates.
/// - `apply` is idempotent per shard.
#[derive(Debug, Clone)]
pub struct MigrationApplier {
    /// Discovered scripts, ascending by version.
    scripts: Vec<MigrationScript>,
}

impl MigrationApplier {
    /// Loads and orders all scripts from the shared folder.
    ///
    /// Non-`.sql` entries are ignored; malformed `.sql` names are rejected
    /// outright so a typo cannot silently drop a migration.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] when the folder cannot be read, a script
    /// name is malformed, or two scripts share a version.
    pub fn load(scripts_dir: &Path) -> Result<Self, MigrationError> {
        let entries = fs::read_dir(scripts_dir).map_err(|err| MigrationError::Io(err.to_string()))?;
        let mut scripts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| MigrationError::Io(err.to_string()))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.ends_with(".sql") {
                continue;
            }
            let (version, description) = parse_script_name(&name)?;
            scripts.push(MigrationScript {
                version,
                description,
                path: entry.path(),
            });
        }
        scripts.sort_by_key(|script| script.version);
        for pair in scripts.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(MigrationError::DuplicateVersion(pair[0].version));
            }
        }
        Ok(Self {
            scripts,
        })
    }

    /// Returns the ordered script set.
    #[must_use]
    pub fn scripts(&self) -> &[MigrationScript] {
        &self.scripts
    }

    /// Returns the newest script version, or zero for an empty folder.
    #[must_use]
    pub fn latest_version(&self) -> SchemaVersion {
        self.scripts.last().map_or(SchemaVersion::ZERO, |script| script.version)
    }

    /// Applies every pending script to a shard, returning applied versions.
    ///
    /// Each script runs in its own transaction together with its
    /// control-table record, so a failing script leaves the shard at the
    /// last fully applied version.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] when a script cannot be read or the
    /// database rejects it.
    pub fn apply(&self, conn: &mut Connection) -> Result<Vec<SchemaVersion>, MigrationError> {
        conn.execute(CONTROL_TABLE_DDL, []).map_err(|err| MigrationError::Db {
            version: SchemaVersion::ZERO,
            message: err.to_string(),
        })?;
        let current = highest_applied_version(conn)?;
        let mut applied = Vec::new();
        for script in &self.scripts {
            if script.version <= current {
                continue;
            }
            let sql =
                fs::read_to_string(&script.path).map_err(|err| MigrationError::Io(err.to_string()))?;
            let tx = conn.transaction().map_err(|err| MigrationError::Db {
                version: script.version,
                message: err.to_string(),
            })?;
            tx.execute_batch(&sql).map_err(|err| MigrationError::Db {
                version: script.version,
                message: err.to_string(),
            })?;
            tx.execute(
                "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                params![script.version.to_string(), script.description, unix_millis()],
            )
            .map_err(|err| MigrationError::Db {
                version: script.version,
                message: err.to_string(),
            })?;
            tx.commit().map_err(|err| MigrationError::Db {
                version: script.version,
                message: err.to_string(),
            })?;
            applied.push(script.version);
        }
        Ok(applied)
    }
}

/// Reads the highest version recorded in the control table.
fn highest_applied_version(conn: &Connection) -> Result<SchemaVersion, MigrationError> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations").map_err(|err| {
        MigrationError::Db {
            version: SchemaVersion::ZERO,
            message: err.to_string(),
        }
    })?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|err| MigrationError::Db {
            version: SchemaVersion::ZERO,
            message: err.to_string(),
        })?;
    let mut highest = SchemaVersion::ZERO;
    for row in rows {
        let raw = row.map_err(|err| MigrationError::Db {
            version: SchemaVersion::ZERO,
            message: err.to_string(),
        })?;
        let version = raw.parse::<SchemaVersion>().map_err(|err| MigrationError::Db {
            version: SchemaVersion::ZERO,
            message: format!("unparseable recorded version: {err}"),
        })?;
        highest = highest.max(version);
    }
    Ok(highest)
}

/// Returns current wall-clock time as unix milliseconds.
fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}
