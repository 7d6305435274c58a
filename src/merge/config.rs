//! Configuration of one merge run.

use std::path::{Path, PathBuf};

/// An injected resource file and the entry path it is stored under.
///
/// The target always names a file entry: it is non-empty, relative and
/// does not end in `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    target: String,
    source: PathBuf,
}

impl ResourceSpec {
    pub fn new(target: impl AsRef<str>, source: impl Into<PathBuf>) -> Result<Self, String> {
        let target = normalize_target(target.as_ref());
        let source = source.into();
        if target.is_empty() || target.ends_with('/') {
            return Err(format!("resource target `{target}` does not name a file entry"));
        }
        if source.as_os_str().is_empty() {
            return Err(format!("resource `{target}` has no source file"));
        }
        Ok(Self { target, source })
    }

    /// Parse `target:source`, or a plain path which is then also the target.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let (target, source) = spec.split_once(':').unwrap_or((spec, spec));
        Self::new(target, source).map_err(|e| format!("invalid resource `{spec}`: {e}"))
    }

    /// Entry path inside the output archive.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Entry path used for a classpath resource: the file's own name.
pub fn classpath_target(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
}

/// Entry paths are relative and slash-separated.
fn normalize_target(target: &str) -> String {
    target.replace('\\', "/").trim_start_matches('/').to_string()
}

/// What to do when two injected resources claim the same path with
/// different content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicateMode {
    /// Resource specs sharing a target are concatenated; any other content
    /// mismatch aborts the run.
    #[default]
    Reject,
    /// The first occurrence wins and a warning is logged.
    Warn,
}

/// Who and where the merge ran, recorded in the build properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironment {
    pub user: String,
    pub host: String,
}

impl BuildEnvironment {
    /// Read user and host names from the usual environment variables.
    pub fn from_env() -> Self {
        let var = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
                .unwrap_or_else(|| "unknown".to_string())
        };
        Self {
            user: var(&["USER", "USERNAME", "LOGNAME"]),
            host: var(&["HOSTNAME", "COMPUTERNAME"]),
        }
    }
}

impl Default for BuildEnvironment {
    fn default() -> Self {
        Self {
            user: "unknown".to_string(),
            host: "unknown".to_string(),
        }
    }
}

/// Everything a merge run needs besides extra combiners, which are
/// registered on the [`ArchiveWriter`](super::ArchiveWriter).
#[derive(Debug, Clone, Default)]
pub struct MergeConfig {
    /// Source archives, in merge order.
    pub sources: Vec<PathBuf>,
    pub resources: Vec<ResourceSpec>,
    /// Files stored under their base name, at most once.
    pub classpath_resources: Vec<PathBuf>,
    /// Executable stub copied verbatim in front of the archive.
    pub launcher: Option<PathBuf>,
    pub main_class: Option<String>,
    /// Raw manifest lines, appended after the fixed header lines.
    pub manifest_lines: Vec<String>,
    /// Files of `key=value` lines merged into the build properties.
    pub build_info_files: Vec<PathBuf>,
    /// `key=value` pairs merged after the build info files.
    pub build_info_lines: Vec<String>,
    /// When non-empty, only entries starting with one of these are kept.
    pub include_prefixes: Vec<String>,
    /// Stamp every entry with a fixed 1980 timestamp.
    pub normalize: bool,
    pub duplicate_mode: DuplicateMode,
    /// Leave out `build-data.properties`.
    pub exclude_build_data: bool,
    /// Identifier recorded as `build.target`.
    pub build_target: String,
    pub environment: BuildEnvironment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_renamed_resource() {
        let spec = ResourceSpec::parse("res1:/tmp/out/res11").unwrap();
        assert_eq!(spec.target(), "res1");
        assert_eq!(spec.source(), Path::new("/tmp/out/res11"));
    }

    #[test]
    fn plain_path_is_its_own_target() {
        let spec = ResourceSpec::parse("/tmp/out/res2").unwrap();
        assert_eq!(spec.target(), "tmp/out/res2");
        assert_eq!(spec.source(), Path::new("/tmp/out/res2"));
    }

    #[test]
    fn rejects_directory_or_empty_targets() {
        assert!(ResourceSpec::parse(":/tmp/x").is_err());
        assert!(ResourceSpec::parse("dir/:/tmp/x").is_err());
        assert!(ResourceSpec::parse("name:").is_err());
    }

    #[test]
    fn constructor_checks_targets_too() {
        assert!(ResourceSpec::new("", "/tmp/x").is_err());
        assert!(ResourceSpec::new("/", "/tmp/x").is_err());
        assert!(ResourceSpec::new("dir/", "/tmp/x").is_err());
        assert!(ResourceSpec::new("name", "").is_err());
        let spec = ResourceSpec::new("/nested/name", "/tmp/x").unwrap();
        assert_eq!(spec.target(), "nested/name");
    }

    #[test]
    fn classpath_target_is_base_name() {
        assert_eq!(
            classpath_target(Path::new("/some/where/cp_res")).as_deref(),
            Some("cp_res")
        );
        assert_eq!(classpath_target(Path::new("/")), None);
    }
}
