//! Graph logic and orchestration for stixkit.
//!
//! This crate resolves relationships over a loaded corpus, extracts one
//! bundle per adversary group, merges partial bundles into the canonical
//! one, and ties those stages together with the downloader
//! (e.g., `run_pipeline`).

pub mod extractor;
pub mod merger;
pub mod pipeline;
pub mod resolver;
