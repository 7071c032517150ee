//! Merge partial bundles into the canonical bundle.
//!
//! Objects are streamed from every candidate file and written straight into
//! the output as they survive deduplication, so memory stays bounded by the
//! set of ids seen so far.

use std::cell::RefCell;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::File;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use stixkit_ingest::BundleStream;
use stixkit_shared::{
    AtomicFile, MergeConfig, RawObject, Result, StixKitError, kinds, new_bundle_id,
    write_pretty_json,
};

use crate::pipeline::ProgressReporter;

/// A candidate file that could not be read to the end.
#[derive(Debug, Clone)]
pub struct StreamFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Counters for a multi-file merge.
#[derive(Debug, Default)]
pub struct MergeStats {
    /// Candidate files streamed.
    pub files: usize,
    /// Objects read across all files.
    pub objects_read: usize,
    /// Objects written to the output.
    pub unique: usize,
    /// Objects dropped because their id was already written.
    pub duplicates: usize,
    /// Objects dropped because they carry no id.
    pub missing_id: usize,
    /// `objects` entries that were not JSON objects.
    pub non_objects: usize,
    pub stream_errors: Vec<StreamFailure>,
    pub output: PathBuf,
    pub elapsed: std::time::Duration,
}

impl MergeStats {
    /// Classify one streamed object. `true` when it is the first with its id.
    fn admit(&mut self, seen: &mut HashSet<String>, object: &RawObject) -> bool {
        match object.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => {
                if seen.insert(id.to_string()) {
                    self.unique += 1;
                    true
                } else {
                    self.duplicates += 1;
                    false
                }
            }
            _ => {
                self.missing_id += 1;
                false
            }
        }
    }
}

/// Outcome of [`Merger::merge`].
#[derive(Debug)]
pub enum MergeReport {
    /// No candidate files; nothing was written.
    NothingToMerge,
    /// A single candidate was copied unchanged.
    ///
    /// `stats` counts the copied file's contents; duplicates and objects
    /// without an id are counted but still present in the output.
    Copied {
        source: PathBuf,
        bytes: u64,
        stats: MergeStats,
    },
    Merged(MergeStats),
}

/// Combines every `*.json` bundle in a directory into one.
pub struct Merger {
    config: MergeConfig,
}

impl Merger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Bundle files to merge, sorted by file name.
    ///
    /// The output file itself is never a candidate. A missing directory has
    /// no candidates.
    pub fn candidate_files(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.raw_dir;
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "raw bundle directory does not exist");
            return Ok(Vec::new());
        }

        let output_name = self.config.output_file.file_name();
        let entries = std::fs::read_dir(dir).map_err(|e| StixKitError::io(dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StixKitError::io(dir, e))?.path();
            let is_json = path.extension() == Some(OsStr::new("json"));
            if is_json && path.is_file() && path.file_name() != output_name {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Merge the candidate files into the configured output file.
    #[instrument(skip_all, fields(dir = %self.config.raw_dir.display(), output = %self.config.output_file.display()))]
    pub fn merge(&self, progress: &dyn ProgressReporter) -> Result<MergeReport> {
        let files = self.candidate_files()?;

        match files.as_slice() {
            [] => {
                warn!("no bundle files to merge");
                Ok(MergeReport::NothingToMerge)
            }
            [single] => self.copy_single(single, progress),
            _ => self.merge_many(&files, progress).map(MergeReport::Merged),
        }
    }

    fn copy_single(&self, source: &Path, progress: &dyn ProgressReporter) -> Result<MergeReport> {
        let start = Instant::now();
        let output = &self.config.output_file;
        info!(source = %source.display(), "single bundle, copying");
        progress.phase("Copying bundle");

        let mut input = File::open(source).map_err(|e| StixKitError::io(source, e))?;
        let mut file = AtomicFile::create(output)?;
        let bytes = std::io::copy(&mut input, &mut file).map_err(|e| StixKitError::io(output, e))?;
        file.commit()?;

        let mut stats = MergeStats {
            files: 1,
            output: output.clone(),
            ..MergeStats::default()
        };
        let mut seen = HashSet::new();
        let mut stream = BundleStream::open(output)?;
        let streamed = stream.for_each_object(|object| {
            stats.admit(&mut seen, &object);
            ControlFlow::Continue(())
        });
        stats.objects_read = stream.objects_read();
        stats.non_objects = stream.non_objects();
        if let Err(e) = streamed {
            warn!(file = %source.display(), error = %e, "copied bundle is not well-formed");
            stats.stream_errors.push(StreamFailure {
                path: source.to_path_buf(),
                error: e.to_string(),
            });
        }
        stats.elapsed = start.elapsed();
        progress.file_streamed(source, 1, 1);

        info!(
            bytes,
            objects_read = stats.objects_read,
            duplicates = stats.duplicates,
            "copy complete"
        );
        Ok(MergeReport::Copied {
            source: source.to_path_buf(),
            bytes,
            stats,
        })
    }

    fn merge_many(&self, files: &[PathBuf], progress: &dyn ProgressReporter) -> Result<MergeStats> {
        let start = Instant::now();
        let output = &self.config.output_file;
        info!(files = files.len(), "merging bundles");
        progress.phase("Merging bundles");

        let bundle = StreamedBundle {
            kind: kinds::BUNDLE,
            id: new_bundle_id(),
            objects: Survivors {
                files,
                progress,
                stats: RefCell::default(),
            },
        };

        let mut file = AtomicFile::create(output)?;
        write_pretty_json(&mut file, &bundle).map_err(|e| StixKitError::io(output, e.into()))?;
        file.commit()?;

        let mut stats = bundle.objects.stats.into_inner();
        stats.files = files.len();
        stats.output = output.clone();
        stats.elapsed = start.elapsed();

        info!(
            files = stats.files,
            objects_read = stats.objects_read,
            unique = stats.unique,
            duplicates = stats.duplicates,
            missing_id = stats.missing_id,
            non_objects = stats.non_objects,
            stream_errors = stats.stream_errors.len(),
            elapsed_ms = stats.elapsed.as_millis(),
            "merge complete"
        );
        Ok(stats)
    }
}

/// Output bundle whose `objects` are produced while it is being written.
#[derive(serde::Serialize)]
struct StreamedBundle<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: String,
    objects: Survivors<'a>,
}

/// The deduplicated objects of every candidate file, in file order.
struct Survivors<'a> {
    files: &'a [PathBuf],
    progress: &'a dyn ProgressReporter,
    stats: RefCell<MergeStats>,
}

impl Serialize for Survivors<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut stats = self.stats.borrow_mut();
        let total = self.files.len();

        for (i, path) in self.files.iter().enumerate() {
            let mut stream = match BundleStream::open(path) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "cannot open bundle");
                    stats.stream_errors.push(StreamFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let mut write_error = None;
            let streamed = stream.for_each_object(|object| {
                if !stats.admit(&mut seen, &object) {
                    return ControlFlow::Continue(());
                }
                match seq.serialize_element(&object) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(e) => {
                        write_error = Some(e);
                        ControlFlow::Break(())
                    }
                }
            });
            stats.objects_read += stream.objects_read();
            stats.non_objects += stream.non_objects();

            if let Some(e) = write_error {
                return Err(e);
            }
            if let Err(e) = streamed {
                warn!(file = %path.display(), error = %e, "stream error, keeping objects read so far");
                stats.stream_errors.push(StreamFailure {
                    path: path.clone(),
                    error: e.to_string(),
                });
            }

            debug!(file = %path.display(), "streamed bundle");
            self.progress.file_streamed(path, i + 1, total);
        }

        seq.end()
    }
}
