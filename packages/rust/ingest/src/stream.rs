//! Incremental bundle reader.
//!
//! [`BundleStream`] drives a `serde_json` reader deserializer over the
//! top-level bundle object. Members other than `objects` are parsed and
//! discarded without being built, and each `objects` element is handed to
//! the caller as soon as it is complete. At most one element is held in
//! memory, so arbitrarily large bundles can be consumed without building the
//! full document tree.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::Value;
use tracing::debug;

use stixkit_shared::{RawObject, Result, StixKitError};

/// Streams the raw objects of one bundle's `objects` array.
///
/// A structural problem is reported once as [`StixKitError::Stream`];
/// objects delivered before it remain valid. The stream is fused after the
/// first pass, successful or not.
pub struct BundleStream<R> {
    reader: R,
    source: PathBuf,
    finished: bool,
    objects_read: usize,
    non_objects: usize,
}

impl BundleStream<BufReader<File>> {
    /// Open a bundle file for streaming.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| StixKitError::load(path, e.to_string()))?;
        Ok(Self::new(BufReader::new(file)).with_source(path))
    }
}

impl<R: BufRead> BundleStream<R> {
    /// Stream from any buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            source: PathBuf::from("<reader>"),
            finished: false,
            objects_read: 0,
            non_objects: 0,
        }
    }

    /// Set the path reported in errors.
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = path.into();
        self
    }

    /// Objects delivered so far.
    pub fn objects_read(&self) -> usize {
        self.objects_read
    }

    /// Array elements skipped because they were not JSON objects.
    pub fn non_objects(&self) -> usize {
        self.non_objects
    }

    /// Hand every object of the `objects` array to `visit`, in document order.
    ///
    /// Returning [`ControlFlow::Break`] from `visit` stops reading without an
    /// error. A bundle without an `objects` member yields nothing.
    pub fn for_each_object<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(RawObject) -> ControlFlow<()>,
    {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut tally = Tally::default();
        let outcome = {
            let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
            let seed = BundleSeed {
                visit: &mut visit,
                tally: &mut tally,
                source: &self.source,
            };
            seed.deserialize(&mut de).and_then(|()| de.end())
        };

        self.objects_read += tally.objects;
        self.non_objects += tally.non_objects;

        match outcome {
            Ok(()) => Ok(()),
            Err(_) if tally.stopped => Ok(()),
            Err(e) => Err(StixKitError::stream(&self.source, e.to_string())),
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    objects: usize,
    non_objects: usize,
    /// The caller asked to stop; the resulting deserializer error is not real.
    stopped: bool,
}

/// The top-level bundle object.
struct BundleSeed<'a, F> {
    visit: &'a mut F,
    tally: &'a mut Tally,
    source: &'a Path,
}

impl<'de, F> DeserializeSeed<'de> for BundleSeed<'_, F>
where
    F: FnMut(RawObject) -> ControlFlow<()>,
{
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, F> Visitor<'de> for BundleSeed<'_, F>
where
    F: FnMut(RawObject) -> ControlFlow<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a bundle object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        let BundleSeed {
            visit,
            tally,
            source,
        } = self;
        let mut has_objects = false;

        while let Some(key) = map.next_key::<String>()? {
            if key == "objects" {
                has_objects = true;
                map.next_value_seed(ObjectsSeed {
                    visit: &mut *visit,
                    tally: &mut *tally,
                    source,
                })?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }

        if !has_objects {
            debug!(source = %source.display(), "bundle has no `objects` member");
        }
        Ok(())
    }
}

/// The `objects` array.
struct ObjectsSeed<'a, F> {
    visit: &'a mut F,
    tally: &'a mut Tally,
    source: &'a Path,
}

impl<'de, F> DeserializeSeed<'de> for ObjectsSeed<'_, F>
where
    F: FnMut(RawObject) -> ControlFlow<()>,
{
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, F> Visitor<'de> for ObjectsSeed<'_, F>
where
    F: FnMut(RawObject) -> ControlFlow<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an `objects` array")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
        let ObjectsSeed {
            visit,
            tally,
            source,
        } = self;

        while let Some(element) = seq.next_element::<Value>()? {
            match element {
                Value::Object(object) => {
                    tally.objects += 1;
                    if visit(object).is_break() {
                        tally.stopped = true;
                        return Err(de::Error::custom("stopped by caller"));
                    }
                }
                other => {
                    tally.non_objects += 1;
                    debug!(source = %source.display(), kind = json_kind(&other), "skipping non-object entry");
                }
            }
        }
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
