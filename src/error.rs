//! Error types for archive parsing and merging.
//!
//! [`FormatError`] comes out of the pure record codecs in [`crate::zip`] and
//! knows nothing about files. [`MergeError`] is what a merge run returns; it
//! tags format problems with the source archive they were found in.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::merge::Fingerprint;

/// Malformed or internally inconsistent archive structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatError {
    /// Entry the problem was found in, when it is known.
    pub entry: Option<String>,
    pub message: String,
}

impl FormatError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            entry: None,
            message: message.into(),
        }
    }

    pub fn in_entry(entry: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entry: Some(entry.into()),
            message: message.into(),
        }
    }

    /// Attach an entry name unless one is already recorded.
    pub fn with_entry(mut self, entry: &str) -> Self {
        if self.entry.is_none() {
            self.entry = Some(entry.to_string());
        }
        self
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entry {
            Some(entry) => write!(f, "entry `{entry}`: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for FormatError {}

/// Reading a fixed-width field failed: the record is cut short.
impl From<std::io::Error> for FormatError {
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("truncated record: {err}"))
    }
}

pub type FormatResult<T> = std::result::Result<T, FormatError>;

/// Errors returned by a merge run. Any of them aborts the run before the
/// end-of-central-directory record is written.
#[derive(Debug, Error)]
pub enum MergeError {
    /// A source archive is malformed.
    #[error("malformed archive {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    /// A file could not be read, or the output could not be written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two inputs disagree on the content of a path that must be unique.
    #[error("conflicting content for `{entry}`: kept {first}, rejected {second}")]
    Conflict {
        entry: String,
        first: Fingerprint,
        second: Fingerprint,
    },

    /// An entry's payload had to be decoded but its compression method is
    /// neither stored nor deflate.
    #[error("{}: entry `{entry}` uses unsupported compression method {method}", path.display())]
    Unsupported {
        path: PathBuf,
        entry: String,
        method: u16,
    },
}

impl MergeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn format(path: impl Into<PathBuf>, source: FormatError) -> Self {
        Self::Format {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MergeError>;
