// crates/fleetstore-core/src/config.rs
// ============================================================================
// Module: Backup Schedule Configuration
// Description: Persistent automatic-backup settings and the due check.
// Purpose: Model the small on-disk config mutated by the scheduler and by
//          user settings.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! The backup configuration is read once at startup and rewritten whenever
//! the scheduler fires or the user changes settings. Persistence lives in
//! `fleetstore-config`; this module only models the record and the
//! "is an automatic backup due" decision.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::Duration;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Frequency
// ============================================================================

/// Cadence of automatic backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackupFrequency {
    /// One automatic backup per day.
    #[default]
    Daily,
    /// One automatic backup per week.
    Weekly,
}

impl BackupFrequency {
    /// Minimum interval between automatic backups.
    #[must_use]
    pub const fn interval(self) -> Duration {
        match self {
            Self::Daily => Duration::hours(24),
            Self::Weekly => Duration::days(7),
        }
    }
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Persistent automatic-backup settings.
///
/// # Invariants
/// - `keep_last_n` is at least 1 (enforced by the config store on load and
///   save).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Whether the scheduler may take automatic backups at all.
    #[serde(default = "default_auto_backup_enabled")]
    pub auto_backup_enabled: bool,
    /// Cadence of automatic backups.
    #[serde(default)]
    pub frequency: BackupFrequency,
    /// Number of automatic backups retained; older ones are pruned FIFO.
    #[serde(default = "default_keep_last_n")]
    pub keep_last_n: u32,
    /// Instant of the most recent automatic backup, if any.
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_auto_backup_at: Option<OffsetDateTime>,
}

/// Returns the default for `auto_backup_enabled`.
const fn default_auto_backup_enabled() -> bool {
    true
}

/// Returns the default retention count.
const fn default_keep_last_n() -> u32 {
    7
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            auto_backup_enabled: default_auto_backup_enabled(),
            frequency: BackupFrequency::default(),
            keep_last_n: default_keep_last_n(),
            last_auto_backup_at: None,
        }
    }
}

impl BackupConfig {
    /// Returns whether an automatic backup is due at the given instant.
    ///
    /// A backup is due when automatic backups are enabled and either none
    /// has ever run or the configured interval has fully elapsed.
    #[must_use]
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        if !self.auto_backup_enabled {
            return false;
        }
        match self.last_auto_backup_at {
            None => true,
            Some(last) => now - last >= self.frequency.interval(),
        }
    }
}
