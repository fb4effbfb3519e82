// crates/fleetstore-core/tests/model_unit.rs
// ============================================================================
// Module: Core Model Unit Tests
// Description: Targeted tests for shard naming, schema versions, manifests,
//              specs, and the backup schedule.
// Purpose: Validate naming invariants, ordering, and due-check semantics.
// ============================================================================

//! ## Overview
//! Unit-level tests for the pure data model:
//! - Shard file naming, recognition, and sidecar derivation
//! - Semantic version parsing, ordering, and serde round trips
//! - Manifest active-shard lookup and validation reports
//! - Master table spec construction and validation
//! - Backup schedule due checks

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

use fleetstore_core::BackupConfig;
use fleetstore_core::BackupFrequency;
use fleetstore_core::BackupKind;
use fleetstore_core::BackupManifest;
use fleetstore_core::BundleValidation;
use fleetstore_core::CURRENT_MANIFEST_VERSION;
use fleetstore_core::CancelToken;
use fleetstore_core::MasterTableSpec;
use fleetstore_core::MasterTableSpecError;
use fleetstore_core::SchemaVersion;
use fleetstore_core::ShardEntry;
use fleetstore_core::is_shard_filename;
use fleetstore_core::shard_filename;
use fleetstore_core::sidecar_filename;
use time::Duration;
use time::OffsetDateTime;
use time::macros::datetime;

// ============================================================================
// SECTION: Shard Naming
// ============================================================================

#[test]
fn shard_filename_embeds_prefix_and_compact_timestamp() {
    let created_at = datetime!(2026-03-15 08:30:45.123 UTC);
    let name = shard_filename("fleet", created_at).expect("filename");
    assert_eq!(name, "fleet_20260315T083045123.db");
    assert!(is_shard_filename(&name, "fleet"));
}

#[test]
fn shard_filename_rejects_bad_prefix() {
    let created_at = OffsetDateTime::now_utc();
    assert!(shard_filename("", created_at).is_err());
    assert!(shard_filename("fleet shard", created_at).is_err());
    assert!(shard_filename("fleet;drop", created_at).is_err());
}

#[test]
fn shard_recognition_requires_prefix_separator_and_extension() {
    assert!(!is_shard_filename("fleet_x.db", "other"));
    assert!(!is_shard_filename("fleet20260101.db", "fleet"));
    assert!(!is_shard_filename("fleet_20260101.db.bak", "fleet"));
    assert!(is_shard_filename("fleet_anything.db", "fleet"));
}

#[test]
fn sidecar_name_shares_the_shard_stem() {
    assert_eq!(
        sidecar_filename("fleet_20260315T083045123.db").as_deref(),
        Some("fleet_20260315T083045123.meta.json")
    );
    assert_eq!(sidecar_filename("fleet.zip"), None);
}

// ============================================================================
// SECTION: Schema Versions
// ============================================================================

#[test]
fn schema_versions_parse_and_order_numerically() {
    let small: SchemaVersion = "1.2.3".parse().expect("parse");
    let large: SchemaVersion = "1.10.0".parse().expect("parse");
    assert!(small < large);
    assert_eq!(small.to_string(), "1.2.3");
    assert_eq!(SchemaVersion::ZERO.to_string(), "0.0.0");
}

#[test]
fn schema_version_rejects_malformed_input() {
    assert!("1.2".parse::<SchemaVersion>().is_err());
    assert!("1.2.3.4".parse::<SchemaVersion>().is_err());
    assert!("a.b.c".parse::<SchemaVersion>().is_err());
}

#[test]
fn schema_version_serde_round_trips_as_string() {
    let version: SchemaVersion = "2.1.0".parse().expect("parse");
    let rendered = serde_json::to_string(&version).expect("serialize");
    assert_eq!(rendered, "\"2.1.0\"");
    let parsed: SchemaVersion = serde_json::from_str(&rendered).expect("deserialize");
    assert_eq!(parsed, version);
}

// ============================================================================
// SECTION: Manifests
// ============================================================================

fn sample_manifest() -> BackupManifest {
    BackupManifest {
        manifest_version: CURRENT_MANIFEST_VERSION,
        schema_version: "1.0.0".parse().expect("version"),
        created_at: datetime!(2026-03-15 08:30:45 UTC),
        kind: BackupKind::Auto,
        shards: vec![
            ShardEntry {
                filename: "fleet_a.db".to_string(),
                size_bytes: 100,
                is_active: false,
                sha256: "00".to_string(),
            },
            ShardEntry {
                filename: "fleet_b.db".to_string(),
                size_bytes: 200,
                is_active: true,
                sha256: "11".to_string(),
            },
        ],
        has_profile_data: false,
        total_size_bytes: 300,
        app_version: "0.1.0".to_string(),
    }
}

#[test]
fn manifest_active_shard_lookup_finds_the_flagged_entry() {
    let manifest = sample_manifest();
    assert_eq!(manifest.active_shard().map(|entry| entry.filename.as_str()), Some("fleet_b.db"));
}

#[test]
fn validation_report_blocks_on_errors_but_not_warnings() {
    let mut validation = BundleValidation::default();
    validation.manifest = Some(sample_manifest());
    validation.push_warning("schema newer than app");
    assert!(validation.is_valid());
    validation.push_error("checksum mismatch");
    assert!(!validation.is_valid());
}

#[test]
fn validation_report_without_manifest_is_invalid() {
    let validation = BundleValidation::default();
    assert!(!validation.is_valid());
}

// ============================================================================
// SECTION: Master Table Specs
// ============================================================================

#[test]
fn copy_all_spec_validates_and_rejects_bad_identifiers() {
    let spec = MasterTableSpec::copy_all("drivers").expect("spec");
    assert!(spec.validate().is_ok());
    assert!(matches!(
        MasterTableSpec::copy_all("drivers; DROP TABLE x"),
        Err(MasterTableSpecError::InvalidIdentifier(_))
    ));
}

#[test]
fn custom_query_replaces_full_copy() {
    let spec = MasterTableSpec::copy_all("drivers")
        .expect("spec")
        .with_custom_query("SELECT id, name FROM hist.drivers WHERE active = 1");
    assert!(!spec.copy_all);
    assert!(spec.validate().is_ok());
}

#[test]
fn spec_with_nothing_to_copy_is_rejected() {
    let mut spec = MasterTableSpec::copy_all("drivers").expect("spec");
    spec.copy_all = false;
    assert!(matches!(spec.validate(), Err(MasterTableSpecError::NothingToCopy(_))));
}

#[test]
fn excluded_columns_are_validated_identifiers() {
    let spec = MasterTableSpec::copy_all("drivers")
        .expect("spec")
        .with_excluded_columns(["notes", "photo_blob"])
        .expect("columns");
    assert_eq!(spec.exclude_columns.len(), 2);
    assert!(
        MasterTableSpec::copy_all("drivers")
            .expect("spec")
            .with_excluded_columns(["bad column"])
            .is_err()
    );
}

// ============================================================================
// SECTION: Backup Schedule
// ============================================================================

#[test]
fn first_backup_is_always_due_when_enabled() {
    let config = BackupConfig::default();
    assert!(config.is_due(OffsetDateTime::now_utc()));
}

#[test]
fn disabled_schedule_is_never_due() {
    let config = BackupConfig {
        auto_backup_enabled: false,
        ..BackupConfig::default()
    };
    assert!(!config.is_due(OffsetDateTime::now_utc()));
}

#[test]
fn daily_schedule_fires_only_after_a_full_day() {
    let last = datetime!(2026-03-15 08:00:00 UTC);
    let config = BackupConfig {
        last_auto_backup_at: Some(last),
        ..BackupConfig::default()
    };
    assert!(!config.is_due(last + Duration::hours(23)));
    assert!(config.is_due(last + Duration::hours(24)));
}

#[test]
fn weekly_schedule_uses_the_longer_interval() {
    let last = datetime!(2026-03-15 08:00:00 UTC);
    let config = BackupConfig {
        frequency: BackupFrequency::Weekly,
        last_auto_backup_at: Some(last),
        ..BackupConfig::default()
    };
    assert!(!config.is_due(last + Duration::days(6)));
    assert!(config.is_due(last + Duration::days(7)));
}

// ============================================================================
// SECTION: Cancellation
// ============================================================================

#[test]
fn cancel_token_clones_share_the_flag() {
    let token = CancelToken::new();
    let clone = token.clone();
    assert!(!clone.is_cancelled());
    token.cancel();
    assert!(clone.is_cancelled());
}
