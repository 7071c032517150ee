//! Application configuration for stixkit.
//!
//! User config lives at `~/.stixkit/stixkit.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StixKitError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "stixkit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".stixkit";

// ---------------------------------------------------------------------------
// Config structs (matching stixkit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Filesystem layout.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Source bundle download settings.
    #[serde(default)]
    pub download: DownloadSettings,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding raw input bundles and the merged canonical bundle.
    #[serde(default = "default_raw_bundles_dir")]
    pub raw_bundles_dir: PathBuf,

    /// Directory receiving one extracted bundle per adversary group.
    #[serde(default = "default_adversary_bundles_dir")]
    pub adversary_bundles_dir: PathBuf,

    /// File name of the merged canonical bundle inside `raw_bundles_dir`.
    #[serde(default = "default_canonical_file")]
    pub canonical_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_bundles_dir: default_raw_bundles_dir(),
            adversary_bundles_dir: default_adversary_bundles_dir(),
            canonical_file: default_canonical_file(),
        }
    }
}

impl PathsConfig {
    /// Full path of the merged canonical bundle.
    pub fn canonical_path(&self) -> PathBuf {
        self.raw_bundles_dir.join(&self.canonical_file)
    }
}

fn default_raw_bundles_dir() -> PathBuf {
    PathBuf::from("data").join("stix")
}
fn default_adversary_bundles_dir() -> PathBuf {
    PathBuf::from("data").join("stix_adversaries")
}
fn default_canonical_file() -> String {
    "stix_full.json".into()
}

/// `[download]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// URL of the source bundle.
    #[serde(default = "default_url")]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Name of the env var holding an optional access token (never store the token itself).
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout_secs(),
            token_env: default_token_env(),
        }
    }
}

fn default_url() -> String {
    "https://raw.githubusercontent.com/mitre-attack/attack-stix-data/master/enterprise-attack/enterprise-attack.json".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from AppConfig, overridable by CLI flags)
// ---------------------------------------------------------------------------

/// Runtime configuration for per-group subgraph extraction.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Canonical bundle to extract from.
    pub input_file: PathBuf,
    /// Directory receiving `<group>_<id>.json` files.
    pub output_dir: PathBuf,
}

impl From<&AppConfig> for ExtractConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            input_file: config.paths.canonical_path(),
            output_dir: config.paths.adversary_bundles_dir.clone(),
        }
    }
}

/// Runtime configuration for merging raw bundles.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Directory scanned for `*.json` candidate bundles.
    pub raw_dir: PathBuf,
    /// Canonical output file; excluded from the candidates by name.
    pub output_file: PathBuf,
}

impl From<&AppConfig> for MergeConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            raw_dir: config.paths.raw_bundles_dir.clone(),
            output_file: config.paths.canonical_path(),
        }
    }
}

/// Runtime configuration for the bundle downloader.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// URL to fetch.
    pub url: String,
    /// Directory the file is written into.
    pub target_dir: PathBuf,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Bearer token, resolved from the configured env var.
    pub token: Option<String>,
}

impl From<&AppConfig> for DownloadConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            url: config.download.url.clone(),
            target_dir: config.paths.raw_bundles_dir.clone(),
            timeout_secs: config.download.timeout_secs,
            token: resolve_token(config),
        }
    }
}

/// Read the access token from the env var named in the config, if set and non-empty.
pub fn resolve_token(config: &AppConfig) -> Option<String> {
    match std::env::var(&config.download.token_env) {
        Ok(val) if !val.is_empty() => Some(val),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.stixkit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StixKitError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.stixkit/stixkit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StixKitError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| StixKitError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| StixKitError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StixKitError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| StixKitError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(())
}
