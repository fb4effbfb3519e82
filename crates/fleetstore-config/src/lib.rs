// crates/fleetstore-config/src/lib.rs
// ============================================================================
// Module: Backup Config Store
// Description: TOML persistence for the backup schedule configuration.
// Purpose: Read the config at startup, rewrite it atomically whenever the
//          scheduler fires or the user changes settings.
// Dependencies: fleetstore-core, serde, thiserror, time, toml
// ============================================================================

//! ## Overview
//! [`BackupConfigStore`] owns the path of the small TOML file holding
//! [`BackupConfig`]. A missing file yields the defaults; saves go through a
//! temp file and an atomic rename so a crash mid-write never leaves a torn
//! config behind. Values are validated on every load and save.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use fleetstore_core::BackupConfig;
use thiserror::Error;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Backup config persistence errors.
#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    /// Filesystem error reading or writing the config file.
    #[error("backup config io error: {0}")]
    Io(String),
    /// The config file exists but cannot be parsed.
    #[error("backup config parse error: {0}")]
    Parse(String),
    /// The config violates an invariant.
    #[error("backup config invalid: {0}")]
    Invalid(String),
}

/// Validates config invariants shared by load and save.
fn validate(config: &BackupConfig) -> Result<(), ConfigError> {
    if config.keep_last_n == 0 {
        return Err(ConfigError::Invalid("keep_last_n must be at least 1".to_string()));
    }
    Ok(())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Reads and rewrites the on-disk backup configuration.
#[derive(Debug, Clone)]
pub struct BackupConfigStore {
    /// Path of the TOML config file.
    path: PathBuf,
}

impl BackupConfigStore {
    /// Creates a store over the given config file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }

    /// Returns the config file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the config, falling back to defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file exists but cannot be read,
    /// parsed, or validated.
    pub fn load(&self) -> Result<BackupConfig, ConfigError> {
        if !self.path.exists() {
            return Ok(BackupConfig::default());
        }
        let raw = fs::read_to_string(&self.path).map_err(|err| ConfigError::Io(err.to_string()))?;
        let config: BackupConfig =
            toml::from_str(&raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        validate(&config)?;
        Ok(config)
    }

    /// Persists the config atomically (temp file + rename).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the config is invalid or the file
    /// cannot be written.
    pub fn save(&self, config: &BackupConfig) -> Result<(), ConfigError> {
        validate(config)?;
        let rendered =
            toml::to_string_pretty(config).map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| ConfigError::Io(err.to_string()))?;
        }
        let temp_path = self.path.with_extension("toml.tmp");
        {
            let mut file =
                fs::File::create(&temp_path).map_err(|err| ConfigError::Io(err.to_string()))?;
            file.write_all(rendered.as_bytes()).map_err(|err| ConfigError::Io(err.to_string()))?;
            file.sync_all().map_err(|err| ConfigError::Io(err.to_string()))?;
        }
        fs::rename(&temp_path, &self.path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            ConfigError::Io(err.to_string())
        })
    }

    /// Records the instant of a completed automatic backup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the config cannot be loaded or saved.
    pub fn record_auto_backup(&self, at: OffsetDateTime) -> Result<BackupConfig, ConfigError> {
        let mut config = self.load()?;
        config.last_auto_backup_at = Some(at);
        self.save(&config)?;
        Ok(config)
    }
}
