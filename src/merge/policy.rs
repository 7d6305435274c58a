//! Per-entry disposition and duplicate bookkeeping.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::warn;

use crate::error::{MergeError, Result};

use super::combiner::CombinerRegistry;
use super::config::DuplicateMode;

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
pub const META_INF_DIR: &str = "META-INF/";
pub const BUILD_DATA_PATH: &str = "build-data.properties";

/// Content identity of an entry: uncompressed size and CRC-32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub size: u64,
    pub crc32: u32,
}

impl Fingerprint {
    pub fn of(data: &[u8]) -> Self {
        let mut crc = flate2::Crc::new();
        crc.update(data);
        Self {
            size: data.len() as u64,
            crc32: crc.sum(),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes, crc32 {:08x}", self.size, self.crc32)
    }
}

/// What happens to one incoming entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Appended to the combiner owning its path; never written on its own.
    Combine,
    /// Not written at all.
    Drop,
    /// Its path was already written; the first occurrence stays.
    SkipDuplicate,
    /// Copied to the output with a new offset.
    PassThrough,
}

/// Result of checking an injected entry against what was already written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// Nothing was written at this path yet.
    Fresh,
    /// Same content as the entry already written.
    Identical,
    /// Different content; the first entry was kept and a warning logged.
    KeptFirst,
}

/// Paths written so far, with content fingerprints for files.
#[derive(Debug, Default)]
pub struct DedupRegistry {
    files: HashMap<String, Fingerprint>,
    directories: HashSet<String>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_file(&mut self, path: &str, fingerprint: Fingerprint) {
        self.files.insert(path.to_string(), fingerprint);
    }

    pub fn record_directory(&mut self, path: &str) {
        self.directories.insert(path.to_string());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    pub fn contains_directory(&self, path: &str) -> bool {
        self.directories.contains(path)
    }

    pub fn fingerprint(&self, path: &str) -> Option<Fingerprint> {
        self.files.get(path).copied()
    }

    /// Compare `candidate` with whatever was written at `path`. A mismatch
    /// is a [`MergeError::Conflict`] under [`DuplicateMode::Reject`] and a
    /// warning under [`DuplicateMode::Warn`]; the written entry stays either way.
    pub fn check(&self, path: &str, candidate: Fingerprint, mode: DuplicateMode) -> Result<DedupOutcome> {
        let Some(first) = self.fingerprint(path) else {
            return Ok(DedupOutcome::Fresh);
        };
        if first == candidate {
            return Ok(DedupOutcome::Identical);
        }
        match mode {
            DuplicateMode::Reject => Err(MergeError::Conflict {
                entry: path.to_string(),
                first,
                second: candidate,
            }),
            DuplicateMode::Warn => {
                warn!(entry = path, kept = %first, ignored = %candidate, "duplicate entry with different content");
                Ok(DedupOutcome::KeptFirst)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.directories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decides each incoming entry's [`Disposition`], looking only at its path
/// and at what was decided before.
#[derive(Debug, Clone, Default)]
pub struct MergePolicy {
    include_prefixes: Vec<String>,
}

impl MergePolicy {
    pub fn new(include_prefixes: Vec<String>) -> Self {
        Self { include_prefixes }
    }

    /// Rules, first match wins:
    /// 1. owned by a combiner: `Combine`
    /// 2. the manifest: `Drop` (the output manifest is synthesized)
    /// 3. already written: `SkipDuplicate`
    /// 4. outside every include prefix: `Drop`
    /// 5. otherwise `PassThrough`
    pub fn decide(&self, path: &str, combiners: &CombinerRegistry, written: &DedupRegistry) -> Disposition {
        if combiners.owns(path) {
            Disposition::Combine
        } else if path == MANIFEST_PATH {
            Disposition::Drop
        } else if written.contains(path) {
            Disposition::SkipDuplicate
        } else if !self.includes(path) && !is_always_kept(path) {
            Disposition::Drop
        } else {
            Disposition::PassThrough
        }
    }

    /// Whether `path` passes the include-prefix filter (always true when no
    /// prefixes are configured).
    pub fn includes(&self, path: &str) -> bool {
        self.include_prefixes.is_empty()
            || self
                .include_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn is_filtering(&self) -> bool {
        !self.include_prefixes.is_empty()
    }
}

/// Synthesized entries that survive any include filter.
pub fn is_always_kept(path: &str) -> bool {
    matches!(path, MANIFEST_PATH | BUILD_DATA_PATH | META_INF_DIR)
}
