//! Longitudinal sampling of MediaWiki full-history dumps.
//!
//! Compressed `pages-meta-history` archives stream through a constant-memory
//! XML tokenizer, a per-page revision sampler, and a buffered Parquet sink.
//! The orchestrator runs many archives at once with separate download and
//! pipeline limits, skipping archives whose artifact already exists.

pub mod archive;
pub mod conf;
pub mod delta;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod sampler;
pub mod sink;
pub mod source;
pub mod store;
pub mod stream;
