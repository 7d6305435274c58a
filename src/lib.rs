//! # singlejar
//!
//! Deterministic merging of zip/jar archives into a single deployable archive.
//!
//! Source archives are read through the [`ReadAt`] trait, entry by entry, and
//! every kept entry is copied to the output without recompression. Special
//! paths (service provider listings, Spring handler files, caller-registered
//! paths) are combined across sources, a manifest and build properties are
//! synthesized, and an executable launcher may be prepended.
//!
//! ## Features
//!
//! - Byte-exact ZIP records, including ZIP64 on both read and write
//! - Sources with prepended data (self-extracting or launcher-prefixed jars)
//! - Normalized timestamps for reproducible output
//! - Include-prefix filtering and duplicate detection by content
//!
//! ## Example
//!
//! ```no_run
//! use singlejar::{ArchiveWriter, Concatenator, MergeConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MergeConfig {
//!         sources: vec!["lib1.jar".into(), "lib2.jar".into()],
//!         normalize: true,
//!         ..MergeConfig::default()
//!     };
//!
//!     let mut writer = ArchiveWriter::new(config);
//!     writer.register_combiner("reference.conf", Box::new(Concatenator::new()));
//!
//!     let summary = writer.write_to_path(std::path::Path::new("deploy.jar")).await?;
//!     println!("{} entries, {} bytes", summary.entries, summary.bytes);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod merge;
pub mod zip;

pub use cli::Cli;
pub use error::{FormatError, MergeError, Result};
pub use io::{LocalFileReader, ReadAt};
pub use merge::{
    ArchiveWriter, Concatenator, DuplicateMode, EntryCombiner, LineConcatenator, MergeConfig,
    MergeSummary, ResourceSpec,
};
pub use zip::{ArchiveEntry, ArchiveReader, SourceEntry};
