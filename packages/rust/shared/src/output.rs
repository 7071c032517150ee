//! Whole-document output files.
//!
//! Every artifact is written to a hidden sibling temp file and renamed over
//! the target only once complete, so readers never observe a half-written
//! bundle.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::error::{Result, StixKitError};

/// Indentation used for pretty-printed bundles.
const INDENT: &[u8] = b"    ";

/// A file being written; becomes visible at `target` on [`AtomicFile::commit`].
///
/// Dropping without committing removes the temp file.
pub struct AtomicFile {
    target: PathBuf,
    temp: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicFile {
    /// Start writing `target`. Parent directories are created as needed.
    pub fn create(target: &Path) -> Result<Self> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StixKitError::io(parent, e))?;
        }
        let temp = temp_path_for(target);
        let file = File::create(&temp).map_err(|e| StixKitError::io(&temp, e))?;
        Ok(Self {
            target: target.to_path_buf(),
            temp,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Flush and move the temp file over the target.
    pub fn commit(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|e| StixKitError::io(&self.temp, e.into_error()))?;
            file.sync_all().map_err(|e| StixKitError::io(&self.temp, e))?;
        }
        if let Err(e) = std::fs::rename(&self.temp, &self.target) {
            let _ = std::fs::remove_file(&self.temp);
            return Err(StixKitError::io(&self.target, e));
        }
        tracing::debug!(path = %self.target.display(), "committed file");
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(std::io::Error::other("file already committed")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

/// Hidden sibling temp path: `dir/.name.tmp`.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    target.with_file_name(format!(".{name}.tmp"))
}

/// Write `path` atomically using the given writer callback.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut AtomicFile) -> std::io::Result<()>,
{
    let mut file = AtomicFile::create(path)?;
    write(&mut file).map_err(|e| StixKitError::io(path, e))?;
    file.commit()
}

/// Pretty-print `value` as JSON into `writer`.
pub fn write_pretty_json<W: Write, T: Serialize + ?Sized>(
    writer: W,
    value: &T,
) -> serde_json::Result<()> {
    let mut ser = Serializer::with_formatter(writer, PrettyFormatter::with_indent(INDENT));
    value.serialize(&mut ser)
}

/// Pretty-print `value` as a JSON string.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    write_pretty_json(&mut buf, value)?;
    // serde_json only emits valid UTF-8
    Ok(String::from_utf8(buf).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("stixkit-output-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn write_atomic_leaves_no_temp_files() {
        let tmp = temp_dir();
        let target = tmp.join("nested").join("out.json");

        write_atomic(&target, |w| w.write_all(b"{}")).unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "{}");
        for entry in std::fs::read_dir(target.parent().unwrap()).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!name.starts_with('.'), "temp file left behind: {name}");
        }

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn failed_write_keeps_previous_contents() {
        let tmp = temp_dir();
        let target = tmp.join("out.json");
        std::fs::write(&target, "old").unwrap();

        let err = write_atomic(&target, |w| {
            w.write_all(b"partial")?;
            Err(std::io::Error::other("boom"))
        })
        .unwrap_err();

        assert!(matches!(err, StixKitError::Io { .. }));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "old");
        assert!(!temp_path_for(&target).exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn pretty_json_uses_four_space_indent() {
        let text = to_pretty_json(&serde_json::json!({"type": "bundle"})).unwrap();
        assert_eq!(text, "{\n    \"type\": \"bundle\"\n}");
    }

    #[test]
    fn temp_path_is_hidden_sibling() {
        let p = temp_path_for(Path::new("/data/stix/stix_full.json"));
        assert_eq!(p, PathBuf::from("/data/stix/.stix_full.json.tmp"));
    }
}
