// crates/fleetstore-cli/src/main.rs
// ============================================================================
// Module: Fleetstore CLI Entry Point
// Description: Command dispatcher for storage lifecycle maintenance.
// Purpose: Expose rotation, backup, validation, and restore over the engine
//          crates for operators and scripts.
// Dependencies: clap, fleetstore-config, fleetstore-core,
//               fleetstore-store-sqlite, serde, serde_json, thiserror, toml
// ============================================================================

//! ## Overview
//! The `fleetstore` binary wires the library crates together from one TOML
//! config file: it initializes the rotation manager, runs rotations and
//! backups on demand, validates bundles, and drives restores. Every
//! subcommand emits a structured summary (JSON by default) so scripts can
//! consume the output, with a text mode for humans.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use fleetstore_config::BackupConfigStore;
use fleetstore_core::BackupKind;
use fleetstore_core::BackupManifest;
use fleetstore_core::CancelToken;
use fleetstore_core::MasterTableSpec;
use fleetstore_core::TableCopyFailure;
use fleetstore_core::TableCopyStats;
use fleetstore_store_sqlite::BackupEngine;
use fleetstore_store_sqlite::BackupEngineConfig;
use fleetstore_store_sqlite::MaintenanceLock;
use fleetstore_store_sqlite::MigrationApplier;
use fleetstore_store_sqlite::RestoreEngine;
use fleetstore_store_sqlite::RestoreOptions;
use fleetstore_store_sqlite::RotationConfig;
use fleetstore_store_sqlite::StorageRotationManager;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default config file consulted when `--config` is not given.
const DEFAULT_CONFIG_PATH: &str = "fleetstore.toml";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "fleetstore", version, disable_help_subcommand = true)]
struct Cli {
    /// Config file path (defaults to fleetstore.toml).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the active shard and rotation pressure.
    Status(StatusCommand),
    /// Seal the active shard and rotate to a fresh one.
    Rotate(RotateCommand),
    /// Take a backup of the full shard set.
    Backup(BackupCommand),
    /// List automatic backups in the managed backup directory.
    ListBackups(ListBackupsCommand),
    /// Validate a backup bundle without touching the live store.
    Validate(ValidateCommand),
    /// Restore a backup bundle over the live shard set.
    Restore(RestoreCommand),
}

/// Output formats for structured CLI commands.
#[derive(ValueEnum, Copy, Clone, Debug)]
enum OutputFormat {
    /// Pretty JSON output.
    Json,
    /// Human-readable text output.
    Text,
}

/// Arguments for `status`.
#[derive(Args, Debug)]
struct StatusCommand {
    /// Output format for the status summary.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

/// Arguments for `rotate`.
#[derive(Args, Debug)]
struct RotateCommand {
    /// Rotate even when no threshold is reached.
    #[arg(long, action = ArgAction::SetTrue)]
    force: bool,
    /// Output format for the rotation summary.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

/// Arguments for `backup`.
#[derive(Args, Debug)]
struct BackupCommand {
    /// Write a portable zip archive to this path instead of an automatic
    /// snapshot in the managed backup directory.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Output format for the backup summary.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

/// Arguments for `list-backups`.
#[derive(Args, Debug)]
struct ListBackupsCommand {
    /// Output format for the backup listing.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
struct ValidateCommand {
    /// Backup bundle to validate (snapshot directory or zip archive).
    #[arg(value_name = "BUNDLE")]
    bundle: PathBuf,
    /// Output format for the validation report.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

/// Arguments for `restore`.
#[derive(Args, Debug)]
struct RestoreCommand {
    /// Backup bundle to restore (snapshot directory or zip archive).
    #[arg(value_name = "BUNDLE")]
    bundle: PathBuf,
    /// Confirm replacing the live shard set.
    #[arg(long, action = ArgAction::SetTrue)]
    yes: bool,
    /// Output format for the restore summary.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

// ============================================================================
// SECTION: Config File
// ============================================================================

/// On-disk CLI configuration (`fleetstore.toml`).
#[derive(Debug, Deserialize)]
struct CliConfig {
    /// Rotation manager settings.
    storage: RotationConfig,
    /// Folder holding the shared migration scripts.
    #[serde(default = "default_migrations_dir")]
    migrations_dir: PathBuf,
    /// Managed directory receiving automatic backups.
    #[serde(default = "default_backup_root")]
    backup_root: PathBuf,
    /// Optional directory of ancillary profile files bundled into backups.
    #[serde(default)]
    profile_dir: Option<PathBuf>,
    /// Path of the backup schedule config file.
    #[serde(default = "default_schedule_path")]
    schedule_path: PathBuf,
    /// Master tables re-seeded into every new shard.
    #[serde(default)]
    master_tables: Vec<MasterTableSpec>,
}

/// Returns the default migration scripts folder.
fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

/// Returns the default managed backup directory.
fn default_backup_root() -> PathBuf {
    PathBuf::from("backups")
}

/// Returns the default backup schedule config path.
fn default_schedule_path() -> PathBuf {
    PathBuf::from("backup-schedule.toml")
}

/// Loads the CLI config file.
fn load_config(path: Option<&Path>) -> CliResult<CliConfig> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    let raw = fs::read_to_string(path).map_err(|err| {
        CliError::new(format!("cannot read config {}: {err}", path.display()))
    })?;
    toml::from_str(&raw)
        .map_err(|err| CliError::new(format!("cannot parse config {}: {err}", path.display())))
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a rendered message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`] from a message.
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Status(command) => command_status(&config, &command),
        Commands::Rotate(command) => command_rotate(&config, &command),
        Commands::Backup(command) => command_backup(&config, &command),
        Commands::ListBackups(command) => command_list_backups(&config, &command),
        Commands::Validate(command) => command_validate(&config, &command),
        Commands::Restore(command) => command_restore(&config, &command),
    }
}

// ============================================================================
// SECTION: Wiring
// ============================================================================

/// Loads migrations and initializes the rotation manager over the shared
/// maintenance lock.
fn build_manager(
    config: &CliConfig,
    lock: MaintenanceLock,
) -> CliResult<StorageRotationManager> {
    let migrations = MigrationApplier::load(&config.migrations_dir)
        .map_err(|err| CliError::new(err.to_string()))?;
    StorageRotationManager::initialize(config.storage.clone(), migrations, lock)
        .map_err(|err| CliError::new(err.to_string()))
}

/// Builds the backup engine over the shared maintenance lock.
fn build_backup_engine(
    config: &CliConfig,
    lock: MaintenanceLock,
) -> CliResult<Arc<BackupEngine>> {
    let engine = BackupEngine::new(
        BackupEngineConfig {
            backup_root: config.backup_root.clone(),
            shard_dir: config.storage.shard_dir.clone(),
            shard_prefix: config.storage.shard_prefix.clone(),
            profile_dir: config.profile_dir.clone(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        },
        BackupConfigStore::new(config.schedule_path.clone()),
        lock,
    )
    .map_err(|err| CliError::new(err.to_string()))?;
    Ok(Arc::new(engine))
}

/// Builds the restore engine over a shared backup engine.
fn build_restore_engine(
    config: &CliConfig,
    backup: Arc<BackupEngine>,
    lock: MaintenanceLock,
) -> CliResult<RestoreEngine> {
    let migrations = MigrationApplier::load(&config.migrations_dir)
        .map_err(|err| CliError::new(err.to_string()))?;
    Ok(RestoreEngine::new(backup, migrations.latest_version(), lock))
}

// ============================================================================
// SECTION: Summaries
// ============================================================================

/// Structured output of `status`.
#[derive(Debug, Serialize)]
struct StatusSummary {
    /// File name of the active shard.
    active_shard: String,
    /// Size of the active shard file in bytes.
    size_bytes: u64,
    /// Schema version of the active shard.
    schema_version: String,
    /// Total shards in the directory, sealed ones included.
    shard_count: usize,
    /// Whether the active shard is due for rotation.
    rotation_due: bool,
}

/// Structured output of `rotate`.
#[derive(Debug, Serialize)]
struct RotateSummary {
    /// File name of the freshly created active shard.
    new_shard: String,
    /// File name of the shard sealed by the rotation.
    sealed_shard: String,
    /// Master tables copied into the new shard.
    tables_copied: Vec<TableCopyStats>,
    /// Master tables whose copy failed; rotation proceeded past them.
    copy_failures: Vec<TableCopyFailure>,
}

/// Structured output of `backup` and one row of `list-backups`.
#[derive(Debug, Serialize)]
struct BackupSummary {
    /// Snapshot directory or archive file.
    path: String,
    /// How the backup was triggered.
    kind: String,
    /// Creation instant, RFC 3339.
    created_at: String,
    /// Shards inside the bundle.
    shard_count: usize,
    /// Total bytes across all shard copies.
    total_size_bytes: u64,
}

/// Structured output of `validate`.
#[derive(Debug, Serialize)]
struct ValidateSummary {
    /// Whether the bundle may be restored.
    valid: bool,
    /// Fatal problems; any entry blocks restore.
    errors: Vec<String>,
    /// Non-fatal observations.
    warnings: Vec<String>,
}

/// Structured output of `restore`.
#[derive(Debug, Serialize)]
struct RestoreSummary {
    /// Safety snapshot taken before the first live write, if any.
    safety_backup: Option<String>,
    /// Shard file names replaced from the bundle.
    restored_shards: Vec<String>,
    /// File name of the shard active after the restore.
    active_shard: Option<String>,
    /// Non-fatal observations gathered along the way.
    warnings: Vec<String>,
    /// Whether ancillary profile files were restored.
    profile_restored: bool,
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes the `status` command.
fn command_status(config: &CliConfig, command: &StatusCommand) -> CliResult<ExitCode> {
    let manager = build_manager(config, MaintenanceLock::new())?;
    let active = manager.active_shard().map_err(|err| CliError::new(err.to_string()))?;
    let catalog = manager.shard_catalog().map_err(|err| CliError::new(err.to_string()))?;
    let rotation_due = manager.should_rotate().map_err(|err| CliError::new(err.to_string()))?;
    let summary = StatusSummary {
        active_shard: active.filename().to_string(),
        size_bytes: active.size_bytes,
        schema_version: active.metadata.schema_version.to_string(),
        shard_count: catalog.len(),
        rotation_due,
    };
    match command.format {
        OutputFormat::Json => emit_json(&summary)?,
        OutputFormat::Text => {
            emit_line(&format!("active shard:   {}", summary.active_shard))?;
            emit_line(&format!("size:           {} bytes", summary.size_bytes))?;
            emit_line(&format!("schema version: {}", summary.schema_version))?;
            emit_line(&format!("shard count:    {}", summary.shard_count))?;
            emit_line(&format!("rotation due:   {}", summary.rotation_due))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes the `rotate` command.
fn command_rotate(config: &CliConfig, command: &RotateCommand) -> CliResult<ExitCode> {
    let lock = MaintenanceLock::new();
    let manager = build_manager(config, lock)?;
    if !command.force {
        let due = manager.should_rotate().map_err(|err| CliError::new(err.to_string()))?;
        if !due {
            emit_line("active shard is under its thresholds; use --force to rotate anyway")?;
            return Ok(ExitCode::SUCCESS);
        }
    }
    let outcome =
        manager.rotate(&config.master_tables).map_err(|err| CliError::new(err.to_string()))?;
    let summary = RotateSummary {
        new_shard: outcome.new_shard.filename().to_string(),
        sealed_shard: outcome.old_shard.filename().to_string(),
        tables_copied: outcome.copy_report.copied,
        copy_failures: outcome.copy_report.failures,
    };
    let clean = summary.copy_failures.is_empty();
    match command.format {
        OutputFormat::Json => emit_json(&summary)?,
        OutputFormat::Text => {
            emit_line(&format!("sealed {} -> active {}", summary.sealed_shard, summary.new_shard))?;
            for stats in &summary.tables_copied {
                emit_line(&format!("  copied {}: {} rows", stats.table_name, stats.rows_copied))?;
            }
            for failure in &summary.copy_failures {
                emit_line(&format!("  FAILED {}: {}", failure.table_name, failure.message))?;
            }
        }
    }
    if clean { Ok(ExitCode::SUCCESS) } else { Ok(ExitCode::FAILURE) }
}

/// Executes the `backup` command.
fn command_backup(config: &CliConfig, command: &BackupCommand) -> CliResult<ExitCode> {
    let backup = build_backup_engine(config, MaintenanceLock::new())?;
    let cancel = CancelToken::new();
    let record = match &command.output {
        Some(dest) => backup
            .create_manual_backup(dest, &cancel)
            .map_err(|err| CliError::new(err.to_string()))?,
        None => {
            backup.create_auto_backup(&cancel).map_err(|err| CliError::new(err.to_string()))?
        }
    };
    let summary = backup_summary(&record.path, &record.manifest)?;
    match command.format {
        OutputFormat::Json => emit_json(&summary)?,
        OutputFormat::Text => emit_line(&format!(
            "{} backup at {} ({} shards, {} bytes)",
            summary.kind, summary.path, summary.shard_count, summary.total_size_bytes
        ))?,
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes the `list-backups` command.
fn command_list_backups(config: &CliConfig, command: &ListBackupsCommand) -> CliResult<ExitCode> {
    let backup = build_backup_engine(config, MaintenanceLock::new())?;
    let records = backup.list_backups().map_err(|err| CliError::new(err.to_string()))?;
    let mut summaries = Vec::with_capacity(records.len());
    for record in &records {
        summaries.push(backup_summary(&record.path, &record.manifest)?);
    }
    match command.format {
        OutputFormat::Json => emit_json(&summaries)?,
        OutputFormat::Text => {
            if summaries.is_empty() {
                emit_line("no backups")?;
            }
            for summary in &summaries {
                emit_line(&format!(
                    "{}  {}  {} shards  {} bytes",
                    summary.created_at, summary.path, summary.shard_count, summary.total_size_bytes
                ))?;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Executes the `validate` command.
fn command_validate(config: &CliConfig, command: &ValidateCommand) -> CliResult<ExitCode> {
    let lock = MaintenanceLock::new();
    let backup = build_backup_engine(config, lock.clone())?;
    let restore = build_restore_engine(config, backup, lock)?;
    let validation =
        restore.validate(&command.bundle).map_err(|err| CliError::new(err.to_string()))?;
    let summary = ValidateSummary {
        valid: validation.is_valid(),
        errors: validation.errors,
        warnings: validation.warnings,
    };
    match command.format {
        OutputFormat::Json => emit_json(&summary)?,
        OutputFormat::Text => {
            emit_line(if summary.valid { "bundle is valid" } else { "bundle is INVALID" })?;
            for error in &summary.errors {
                emit_line(&format!("  error: {error}"))?;
            }
            for warning in &summary.warnings {
                emit_line(&format!("  warning: {warning}"))?;
            }
        }
    }
    if summary.valid { Ok(ExitCode::SUCCESS) } else { Ok(ExitCode::FAILURE) }
}

/// Executes the `restore` command.
fn command_restore(config: &CliConfig, command: &RestoreCommand) -> CliResult<ExitCode> {
    if !command.yes {
        return Err(CliError::new(
            "restore replaces the live shard set; pass --yes to confirm".to_string(),
        ));
    }
    let lock = MaintenanceLock::new();
    let backup = build_backup_engine(config, lock.clone())?;
    let restore = build_restore_engine(config, backup, lock.clone())?;
    let cancel = CancelToken::new();
    let report = restore
        .restore(
            &command.bundle,
            RestoreOptions {
                confirmed: true,
            },
            &cancel,
        )
        .map_err(|err| CliError::new(err.to_string()))?;
    // Reopen the write handle on the restored active shard.
    let manager = build_manager(config, lock)?;
    manager.reload().map_err(|err| CliError::new(err.to_string()))?;
    let summary = RestoreSummary {
        safety_backup: report.safety_backup.map(|path| path.display().to_string()),
        restored_shards: report.restored_shards,
        active_shard: report.active_shard,
        warnings: report.warnings,
        profile_restored: report.profile_restored,
    };
    match command.format {
        OutputFormat::Json => emit_json(&summary)?,
        OutputFormat::Text => {
            emit_line(&format!("restored {} shards", summary.restored_shards.len()))?;
            if let Some(active) = &summary.active_shard {
                emit_line(&format!("active shard: {active}"))?;
            }
            if let Some(safety) = &summary.safety_backup {
                emit_line(&format!("safety backup: {safety}"))?;
            }
            for warning in &summary.warnings {
                emit_line(&format!("  warning: {warning}"))?;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Builds a backup summary row from a record.
fn backup_summary(path: &Path, manifest: &BackupManifest) -> CliResult<BackupSummary> {
    let created_at = manifest
        .created_at
        .format(&Rfc3339)
        .map_err(|err| CliError::new(format!("cannot format timestamp: {err}")))?;
    Ok(BackupSummary {
        path: path.display().to_string(),
        kind: match manifest.kind {
            BackupKind::Auto => "auto".to_string(),
            BackupKind::Manual => "manual".to_string(),
        },
        created_at,
        shard_count: manifest.shards.len(),
        total_size_bytes: manifest.total_size_bytes,
    })
}

/// Serializes a summary as pretty JSON to stdout.
fn emit_json<T: Serialize>(value: &T) -> CliResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("cannot serialize output: {err}")))?;
    emit_line(&rendered)
}

/// Writes a line to stdout.
fn emit_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::new(format!("cannot write to stdout: {err}")))
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{message}");
    ExitCode::FAILURE
}
