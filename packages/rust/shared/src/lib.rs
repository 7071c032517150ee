//! Shared types, error model, and configuration for stixkit.
//!
//! This crate is the foundation depended on by all other stixkit crates.
//! It provides:
//! - [`StixKitError`]: the unified error type
//! - Domain types ([`StixObject`], [`StixCommon`], [`Bundle`], [`ExternalReference`])
//! - Configuration ([`AppConfig`], runtime configs, config loading)
//! - Atomic output files ([`AtomicFile`], [`write_atomic`])

pub mod config;
pub mod error;
pub mod output;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DownloadConfig, DownloadSettings, ExtractConfig, MergeConfig, PathsConfig,
    config_dir, config_file_path, init_config, init_config_at, load_config, load_config_from,
    resolve_token,
};
pub use error::{Result, StixKitError};
pub use output::{AtomicFile, temp_path_for, to_pretty_json, write_atomic, write_pretty_json};
pub use types::{
    AttackPattern, Bundle, Campaign, ExternalReference, GenericObject, IntrusionSet,
    KillChainPhase, LOOSE_FALLBACK_KINDS, LooseObject, MITRE_SOURCE_NAME, ObjectParseError,
    RawObject, Relationship, RelationshipRef, StixCommon, StixObject, is_standard_type, kinds,
    new_bundle_id,
};
