//! Whole-document bundle loader.
//!
//! Reads a bundle file, decodes every entry of its `objects` array and keeps
//! going when individual entries fail. Decoding is two-stage: strict typed
//! decode first, then a raw-map fallback for [`LOOSE_FALLBACK_KINDS`].

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use stixkit_shared::{
    LOOSE_FALLBACK_KINDS, LooseObject, ObjectParseError, Result, StixKitError, StixObject,
};

/// An entry that was dropped during loading.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedObject {
    /// Position in the input `objects` array.
    pub index: usize,
    pub reason: ObjectParseError,
}

/// The decoded contents of one bundle file.
#[derive(Debug, Clone)]
pub struct LoadedBundle {
    /// Where the bundle came from (`<memory>` for string sources).
    pub source: PathBuf,
    /// Successfully decoded objects, in document order.
    pub objects: Vec<StixObject>,
    /// Entries that could not be decoded.
    pub skipped: Vec<SkippedObject>,
}

impl LoadedBundle {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Objects kept through the raw-map fallback.
    pub fn loose_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_loose()).count()
    }

    /// Adversary groups, in document order.
    pub fn intrusion_sets(&self) -> impl Iterator<Item = &StixObject> {
        self.objects.iter().filter(|o| o.is_intrusion_set())
    }
}

/// Decode one raw entry.
///
/// Allow-listed kinds that fail strict decoding are kept as
/// [`StixObject::Loose`] with every field intact; anything else that fails is
/// returned as the skip reason.
pub fn decode_object(value: Value) -> std::result::Result<StixObject, ObjectParseError> {
    let Value::Object(raw) = value else {
        return Err(ObjectParseError::NotAnObject);
    };

    let fallback_allowed = matches!(
        raw.get("type").and_then(Value::as_str),
        Some(kind) if LOOSE_FALLBACK_KINDS.contains(&kind)
    );
    if !fallback_allowed {
        return StixObject::decode_strict_map(raw);
    }

    match StixObject::decode_strict_map(raw.clone()) {
        Ok(obj) => Ok(obj),
        Err(reason) => {
            debug!(%reason, "strict decode failed, keeping raw properties");
            LooseObject::from_raw(raw)
                .map(StixObject::Loose)
                .ok_or(reason)
        }
    }
}

/// Load and decode a bundle file.
///
/// A missing file or invalid JSON is fatal ([`StixKitError::Load`]) and no
/// partial result is returned. Per-object failures are logged and recorded
/// in [`LoadedBundle::skipped`].
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_bundle(path: &Path) -> Result<LoadedBundle> {
    let content = std::fs::read_to_string(path).map_err(|e| StixKitError::load(path, e.to_string()))?;
    let document: Value = serde_json::from_str(&content)
        .map_err(|e| StixKitError::load(path, format!("invalid JSON: {e}")))?;
    drop(content);

    decode_document(path.to_path_buf(), document)
}

/// Load and decode a bundle held in memory.
pub fn load_bundle_from_str(json: &str) -> Result<LoadedBundle> {
    let source = PathBuf::from("<memory>");
    let document: Value = serde_json::from_str(json)
        .map_err(|e| StixKitError::load(&source, format!("invalid JSON: {e}")))?;
    decode_document(source, document)
}

fn decode_document(source: PathBuf, document: Value) -> Result<LoadedBundle> {
    let Value::Object(mut top) = document else {
        return Err(StixKitError::load(&source, "top-level value is not a JSON object"));
    };

    let entries = match top.remove("objects") {
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(StixKitError::load(&source, "`objects` is not an array")),
        None => Vec::new(),
    };

    let mut objects = Vec::with_capacity(entries.len());
    let mut skipped = Vec::new();

    for (index, entry) in entries.into_iter().enumerate() {
        match decode_object(entry) {
            Ok(obj) => objects.push(obj),
            Err(reason) => {
                match &reason {
                    ObjectParseError::UnrecognizedType(kind) => {
                        debug!(index, %kind, "skipping object of unrecognized type")
                    }
                    _ => warn!(index, %reason, "skipping object"),
                }
                skipped.push(SkippedObject { index, reason });
            }
        }
    }

    let loaded = LoadedBundle {
        source,
        objects,
        skipped,
    };

    info!(
        parsed = loaded.objects.len(),
        loose = loaded.loose_count(),
        skipped = loaded.skipped_count(),
        "bundle loaded"
    );

    Ok(loaded)
}
