// crates/fleetstore-core/src/master.rs
// ============================================================================
// Module: Master Table Specs
// Description: Declarations of reference tables re-seeded into new shards.
// Purpose: Describe which lookup tables must exist, fully or filtered, in
//          every shard so lookups never require cross-shard joins.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Master tables (drivers, vehicles, routes, and the like) are copied from
//! the sealed shard into each freshly created shard during rotation. A
//! [`MasterTableSpec`] declares one such table: copy everything, or run a
//! custom filtering query, optionally truncating first and excluding
//! columns. Per-table copy outcomes are collected into a
//! [`MasterCopyReport`]; a single failed table never aborts the rotation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Error raised when a master table spec is malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MasterTableSpecError {
    /// Table or column identifiers must stay within `[A-Za-z0-9_]`.
    #[error("invalid identifier {0:?}: only ASCII alphanumerics and '_' are allowed")]
    InvalidIdentifier(String),
    /// Neither `copy_all` nor a custom query was declared.
    #[error("master table {0:?} declares neither copy_all nor a custom query")]
    NothingToCopy(String),
}

/// Returns whether an identifier is safe to splice into generated SQL.
fn identifier_is_valid(identifier: &str) -> bool {
    !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// SECTION: Spec
// ============================================================================

/// Declaration of one reference table propagated into every new shard.
///
/// # Invariants
/// - `table_name` and every excluded column are validated identifiers.
/// - Either `copy_all` is true or `custom_query` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterTableSpec {
    /// Name of the table in both source and destination shards.
    pub table_name: String,
    /// Copy every row of the source table.
    #[serde(default)]
    pub copy_all: bool,
    /// Custom `SELECT` run instead of the full-table copy. The sealed
    /// source shard is attached as `hist`; the query must yield the
    /// destination column list.
    #[serde(default)]
    pub custom_query: Option<String>,
    /// Columns omitted from the copy (left at their destination defaults).
    #[serde(default)]
    pub exclude_columns: BTreeSet<String>,
    /// Delete destination rows before copying.
    #[serde(default)]
    pub truncate_before_copy: bool,
}

impl MasterTableSpec {
    /// Creates a full-table copy spec for a table.
    ///
    /// # Errors
    ///
    /// Returns [`MasterTableSpecError`] when the table name is not a valid
    /// identifier.
    pub fn copy_all(table_name: impl Into<String>) -> Result<Self, MasterTableSpecError> {
        let table_name = table_name.into();
        if !identifier_is_valid(&table_name) {
            return Err(MasterTableSpecError::InvalidIdentifier(table_name));
        }
        Ok(Self {
            table_name,
            copy_all: true,
            custom_query: None,
            exclude_columns: BTreeSet::new(),
            truncate_before_copy: false,
        })
    }

    /// Replaces the full-table copy with a custom filtering query.
    #[must_use]
    pub fn with_custom_query(mut self, query: impl Into<String>) -> Self {
        self.custom_query = Some(query.into());
        self.copy_all = false;
        self
    }

    /// Declares columns to omit from the copy.
    ///
    /// # Errors
    ///
    /// Returns [`MasterTableSpecError`] when a column name is not a valid
    /// identifier.
    pub fn with_excluded_columns<I, S>(mut self, columns: I) -> Result<Self, MasterTableSpecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            let column = column.into();
            if !identifier_is_valid(&column) {
                return Err(MasterTableSpecError::InvalidIdentifier(column));
            }
            self.exclude_columns.insert(column);
        }
        Ok(self)
    }

    /// Requests a destination truncate before the copy.
    #[must_use]
    pub const fn with_truncate(mut self) -> Self {
        self.truncate_before_copy = true;
        self
    }

    /// Validates invariants on a spec built from deserialized input.
    ///
    /// # Errors
    ///
    /// Returns [`MasterTableSpecError`] when identifiers are malformed or
    /// the spec declares nothing to copy.
    pub fn validate(&self) -> Result<(), MasterTableSpecError> {
        if !identifier_is_valid(&self.table_name) {
            return Err(MasterTableSpecError::InvalidIdentifier(self.table_name.clone()));
        }
        for column in &self.exclude_columns {
            if !identifier_is_valid(column) {
                return Err(MasterTableSpecError::InvalidIdentifier(column.clone()));
            }
        }
        if !self.copy_all && self.custom_query.is_none() {
            return Err(MasterTableSpecError::NothingToCopy(self.table_name.clone()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Copy Report
// ============================================================================

/// Successful copy of one master table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCopyStats {
    /// Table that was copied.
    pub table_name: String,
    /// Number of rows written into the destination shard.
    pub rows_copied: u64,
}

/// Failed copy of one master table. Non-fatal for the rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCopyFailure {
    /// Table whose copy failed.
    pub table_name: String,
    /// Failure description.
    pub message: String,
}

/// Aggregated outcome of the master-table propagation step of a rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterCopyReport {
    /// Tables copied successfully.
    pub copied: Vec<TableCopyStats>,
    /// Tables whose copy failed; rotation proceeded past them.
    pub failures: Vec<TableCopyFailure>,
}

impl MasterCopyReport {
    /// Returns whether every declared table copied cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
