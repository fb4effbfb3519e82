// crates/fleetstore-core/src/cancel.rs
// ============================================================================
// Module: Cancellation Token
// Description: Cooperative cancellation flag for long-running copies.
// Purpose: Let callers abort archive extraction and bulk page copies
//          between suspension points.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Backup and restore stream whole database files page by page; both check
//! a shared [`CancelToken`] between copy steps. Cancellation is cooperative
//! and observed at the next check, never mid-write.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

// ============================================================================
// SECTION: Token
// ============================================================================

/// Cloneable cooperative cancellation flag.
///
/// # Invariants
/// - Once cancelled, a token never resets.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    /// Shared cancellation flag.
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; observed at the next cooperative check.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
