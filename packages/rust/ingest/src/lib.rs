//! Bundle ingestion: whole-document loading and incremental streaming.
//!
//! This crate provides:
//! - [`loader`]: decodes a bundle into typed [`stixkit_shared::StixObject`]s,
//!   tolerating per-object failures
//! - [`stream`]: hands raw objects from very large bundles to a callback one at a time

pub mod loader;
pub mod stream;

pub use loader::{LoadedBundle, SkippedObject, decode_object, load_bundle, load_bundle_from_str};
pub use stream::BundleStream;
