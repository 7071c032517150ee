//! Fetch upstream STIX bundles into the raw bundle directory.
//!
//! The response body is streamed to disk chunk by chunk and hashed on the
//! way, so even the full ATT&CK corpus never sits in memory.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use url::Url;

use stixkit_shared::{AtomicFile, DownloadConfig, Result, StixKitError};

/// User-Agent string for download requests.
const USER_AGENT: &str = concat!("stixkit/", env!("CARGO_PKG_VERSION"));

/// File name used when the URL path has no usable last segment.
const FALLBACK_FILE_NAME: &str = "bundle.json";

/// A bundle file that was downloaded.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub bytes: u64,
    /// Hex SHA-256 of the written file.
    pub sha256: String,
}

/// Download `config.url` into `config.target_dir`.
///
/// Non-2xx responses fail with [`StixKitError::Network`] and leave any
/// existing file untouched.
#[instrument(skip_all, fields(url = %config.url))]
pub async fn download(config: &DownloadConfig) -> Result<DownloadResult> {
    let url = Url::parse(&config.url)
        .map_err(|e| StixKitError::validation(format!("invalid download URL {}: {e}", config.url)))?;
    let path = config.target_dir.join(file_name_from_url(&url));

    let client = build_client(config.timeout_secs)?;
    let mut request = client.get(url.clone());
    if let Some(token) = &config.token {
        debug!("using bearer token");
        request = request.bearer_auth(token);
    }

    let mut response = request
        .send()
        .await
        .map_err(|e| StixKitError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(StixKitError::Network(format!("{url}: HTTP {status}")));
    }

    info!(file = %path.display(), "downloading bundle");

    let mut file = AtomicFile::create(&path)?;
    let mut hasher = Sha256::new();
    let mut bytes = 0u64;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| StixKitError::Network(format!("{url}: failed to read body: {e}")))?
    {
        hasher.update(&chunk);
        file.write_all(&chunk).map_err(|e| StixKitError::io(&path, e))?;
        bytes += chunk.len() as u64;
    }
    file.commit()?;

    let sha256 = format!("{:x}", hasher.finalize());
    info!(bytes, %sha256, "download complete");

    Ok(DownloadResult {
        path,
        bytes,
        sha256,
    })
}

/// Last non-empty path segment of `url`, or `bundle.json`.
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_string()
}

/// Build a reqwest client with appropriate settings.
fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| StixKitError::Network(format!("failed to build HTTP client: {e}")))
}
