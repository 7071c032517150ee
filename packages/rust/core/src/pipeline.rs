//! End-to-end refresh: download → merge → extract.

use std::path::Path;
use std::time::Instant;

use tracing::{info, instrument, warn};

use stixkit_download::DownloadResult;
use stixkit_shared::{AppConfig, DownloadConfig, ExtractConfig, MergeConfig, Result};

use crate::extractor::{ExtractReport, Extractor};
use crate::merger::{MergeReport, Merger};

/// Configuration for [`run_pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// `None` skips the download stage.
    pub download: Option<DownloadConfig>,
    pub merge: MergeConfig,
    pub extract: ExtractConfig,
}

impl PipelineConfig {
    /// Build every stage's config from the application config.
    pub fn from_app(config: &AppConfig, skip_download: bool) -> Self {
        Self {
            download: (!skip_download).then(|| DownloadConfig::from(config)),
            merge: MergeConfig::from(config),
            extract: ExtractConfig::from(config),
        }
    }
}

/// Result of [`run_pipeline`].
#[derive(Debug)]
pub struct PipelineResult {
    /// `None` when the download was skipped or failed.
    pub download: Option<DownloadResult>,
    pub merge: MergeReport,
    pub extract: ExtractReport,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before each group's bundle is assembled.
    fn group_extracted(&self, name: &str, current: usize, total: usize);
    /// Called after each candidate file has been merged.
    fn file_streamed(&self, path: &Path, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, result: &PipelineResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn group_extracted(&self, _name: &str, _current: usize, _total: usize) {}
    fn file_streamed(&self, _path: &Path, _current: usize, _total: usize) {}
    fn done(&self, _result: &PipelineResult) {}
}

/// Run the full refresh.
///
/// 1. Download the upstream bundle into the raw directory (optional)
/// 2. Merge the raw directory into the canonical bundle
/// 3. Extract one bundle per adversary group
///
/// A failed download is logged and the pipeline continues with whatever is
/// already on disk. Merge and load failures abort.
#[instrument(skip_all, fields(skip_download = config.download.is_none()))]
pub async fn run_pipeline(
    config: &PipelineConfig,
    progress: &dyn ProgressReporter,
) -> Result<PipelineResult> {
    let start = Instant::now();

    // --- Phase 1: Download ---
    let download = match &config.download {
        Some(download_config) => {
            progress.phase("Downloading bundle");
            match stixkit_download::download(download_config).await {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(error = %e, "download failed, continuing with local bundles");
                    None
                }
            }
        }
        None => None,
    };

    // --- Phase 2: Merge ---
    let merge = Merger::new(config.merge.clone()).merge(progress)?;

    // --- Phase 3: Extract ---
    let extract = Extractor::new(config.extract.clone()).run(progress)?;

    let result = PipelineResult {
        download,
        merge,
        extract,
        elapsed: start.elapsed(),
    };

    info!(
        groups = result.extract.written.len(),
        elapsed_ms = result.elapsed.as_millis(),
        "pipeline complete"
    );
    progress.done(&result);

    Ok(result)
}
