//! ZIP archive format: record codecs and a forward-only archive reader.
//!
//! ## Architecture
//!
//! - [`structures`]: Record types (EOCD, ZIP64 records, central and local headers) and their encoders
//! - [`parser`]: Pure parsing of those records from raw bytes
//! - [`timestamp`]: MS-DOS date/time packing and the clock used when writing
//! - [`reader`]: [`ArchiveReader`], which walks one archive entry by entry
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! All integers are little-endian. Offsets stored in headers are absolute
//! file offsets, so anything prepended to an archive (a launcher stub) must
//! be accounted for when they are written.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB or more than 65535 entries
//! - STORED and DEFLATE payloads can be decoded; anything else can still be
//!   copied verbatim
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support

pub mod parser;
mod reader;
pub mod structures;
pub mod timestamp;

pub use parser::parse_central_directory;
pub use reader::{ArchiveReader, SourceEntry};
pub use structures::*;
pub use timestamp::{DosDateTime, NormalizationClock, CODE_FILE_SUFFIX};
