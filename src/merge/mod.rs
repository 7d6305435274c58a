//! Merging many archives and loose files into one output archive.
//!
//! ## Architecture
//!
//! - [`config`]: [`MergeConfig`], the complete description of one run
//! - [`policy`]: per-entry [`Disposition`] and duplicate bookkeeping
//! - [`combiner`]: accumulators for paths whose content is merged
//! - [`manifest`]: the synthesized manifest and build properties
//! - [`writer`]: [`ArchiveWriter`], the single-pass merge engine
//!
//! ## Output layout
//!
//! 1. Launcher bytes, if any
//! 2. `META-INF/`, `META-INF/MANIFEST.MF`, `build-data.properties`
//! 3. Source entries in source order, then injected resources
//! 4. Combined entries, in combiner registration order
//! 5. Central directory and end records

pub mod combiner;
pub mod config;
pub mod manifest;
pub mod policy;
pub mod writer;

pub use combiner::{CombinerRegistry, Concatenator, EntryCombiner, LineConcatenator};
pub use config::{BuildEnvironment, DuplicateMode, MergeConfig, ResourceSpec};
pub use manifest::{BuildProperties, Manifest};
pub use policy::{DedupOutcome, DedupRegistry, Disposition, Fingerprint, MergePolicy};
pub use writer::{ArchiveWriter, MergeSummary, OutputCursor, WriterState};
