// crates/fleetstore-store-sqlite/src/lock.rs
// ============================================================================
// Module: Maintenance Lock
// Description: Advisory operation-in-progress guard shared by rotation,
//              backup, and restore.
// Purpose: Refuse overlapping maintenance operations instead of letting a
//          scheduled backup race a user-initiated restore.
// Dependencies: std, thiserror
// ============================================================================

//! ## Overview
//! Rotation, backup, and restore all mutate or stream the same shard set.
//! Each entry point takes the shared [`MaintenanceLock`] with a non-blocking
//! `try_lock`; a second caller gets [`MaintenanceLockError::Busy`] right
//! away rather than queueing behind a long page copy.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::TryLockError;

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Maintenance lock acquisition errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MaintenanceLockError {
    /// Another rotation, backup, or restore currently holds the lock.
    #[error("another maintenance operation is in progress")]
    Busy,
}

// ============================================================================
// SECTION: Lock
// ============================================================================

/// Cloneable advisory lock shared by all maintenance entry points.
///
/// # Invariants
/// - Acquisition never blocks; contention surfaces as [`MaintenanceLockError::Busy`].
#[derive(Debug, Clone, Default)]
pub struct MaintenanceLock {
    /// Shared lock state.
    inner: Arc<Mutex<()>>,
}

/// Guard proving a maintenance operation holds the lock.
#[derive(Debug)]
pub struct MaintenanceGuard<'a> {
    /// Held mutex guard; releasing it releases the lock.
    _guard: MutexGuard<'a, ()>,
}

impl MaintenanceLock {
    /// Creates a fresh, unheld lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// A poisoned lock is recovered rather than propagated: the `()` state
    /// cannot be left inconsistent by a panicking holder.
    ///
    /// # Errors
    ///
    /// Returns [`MaintenanceLockError::Busy`] when another operation holds
    /// the lock.
    pub fn acquire(&self) -> Result<MaintenanceGuard<'_>, MaintenanceLockError> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(MaintenanceGuard {
                _guard: guard,
            }),
            Err(TryLockError::Poisoned(poisoned)) => Ok(MaintenanceGuard {
                _guard: poisoned.into_inner(),
            }),
            Err(TryLockError::WouldBlock) => Err(MaintenanceLockError::Busy),
        }
    }
}
