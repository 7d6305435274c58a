//! The merge engine: drives source readers in order and writes the output
//! archive in a single streaming pass.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use flate2::write::DeflateEncoder;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::error::{MergeError, Result};
use crate::zip::{
    push_extra_block, ArchiveReader, CentralDirectoryRecord, CompressionMethod, DosDateTime,
    EndOfCentralDirectory, NormalizationClock, Zip64EOCD, Zip64EOCDLocator, FLAG_DATA_DESCRIPTOR,
    FLAG_UTF8, JAR_MAGIC_EXTRA_ID, VERSION_DEFAULT, VERSION_MADE_BY_UNIX, ZIP64_MARKER_16,
    ZIP64_MARKER_32,
};

use super::combiner::{CombinerRegistry, EntryCombiner};
use super::config::{classpath_target, DuplicateMode, MergeConfig, ResourceSpec};
use super::manifest::{BuildProperties, Manifest};
use super::policy::{
    is_always_kept, DedupOutcome, DedupRegistry, Disposition, Fingerprint, MergePolicy,
    BUILD_DATA_PATH, MANIFEST_PATH, META_INF_DIR,
};

/// `-rw-r--r--` regular file, in the high half of the external attributes.
const FILE_ATTRIBUTES: u32 = 0o100644 << 16;
/// `drwxr-xr-x` plus the MS-DOS directory bit.
const DIRECTORY_ATTRIBUTES: u32 = (0o40755 << 16) | 0x10;

/// Output sink that counts every byte written. Local header offsets are
/// taken from [`position`](Self::position) when an entry is emitted.
pub struct OutputCursor<W> {
    inner: W,
    position: u64,
}

impl<W: AsyncWrite + Unpin> OutputCursor<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    pub async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(data).await?;
        self.position += data.len() as u64;
        Ok(())
    }

    /// Copy `reader` to the end of the output, returning the bytes copied.
    pub async fn copy_from<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> std::io::Result<u64> {
        let copied = tokio::io::copy(reader, &mut self.inner).await?;
        self.position += copied;
        Ok(copied)
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush().await
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Stages of one merge run, always visited in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriterState {
    /// Launcher bytes are being copied.
    Init,
    /// Synthesized headers, sources and resources are being written.
    Streaming,
    /// Combiners are being flushed.
    Finalizing,
    /// Central directory and end records are written.
    Done,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Entries in the output's central directory.
    pub entries: u64,
    /// Size of the output, launcher included.
    pub bytes: u64,
    pub sources: usize,
    /// Source entries copied through unchanged.
    pub copied: usize,
    /// Source and resource contributions handed to combiners.
    pub combined: usize,
    pub duplicates: usize,
    pub dropped: usize,
    /// Directory entries created because a kept path needed them.
    pub synthesized_directories: usize,
}

/// Merges the inputs named by a [`MergeConfig`] into one archive.
///
/// ```no_run
/// use singlejar::{ArchiveWriter, MergeConfig};
///
/// # async fn run() -> singlejar::Result<()> {
/// let config = MergeConfig {
///     sources: vec!["lib1.jar".into(), "lib2.jar".into()],
///     main_class: Some("com.example.Main".to_string()),
///     normalize: true,
///     ..MergeConfig::default()
/// };
/// let summary = ArchiveWriter::new(config)
///     .write_to_path(std::path::Path::new("deploy.jar"))
///     .await?;
/// println!("{} entries", summary.entries);
/// # Ok(())
/// # }
/// ```
pub struct ArchiveWriter {
    config: MergeConfig,
    combiners: CombinerRegistry,
}

impl ArchiveWriter {
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            combiners: CombinerRegistry::with_builtins(),
        }
    }

    /// Route every entry at `path` to `combiner`, replacing any combiner
    /// already registered for it.
    pub fn register_combiner(
        &mut self,
        path: impl Into<String>,
        combiner: Box<dyn EntryCombiner>,
    ) -> Option<Box<dyn EntryCombiner>> {
        self.combiners.register(path, combiner)
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Create (or truncate) `path` and merge into it.
    pub async fn write_to_path(self, path: &Path) -> Result<MergeSummary> {
        let file = fs::File::create(path)
            .await
            .map_err(|e| MergeError::io(path, e))?;
        self.write_to(BufWriter::new(file), path).await
    }

    /// Merge into `out`. `output_name` names the output in errors.
    ///
    /// On error the output holds no end of central directory record, so a
    /// partially written archive cannot be mistaken for a valid one.
    pub async fn write_to<W: AsyncWrite + Unpin>(
        self,
        out: W,
        output_name: impl Into<PathBuf>,
    ) -> Result<MergeSummary> {
        let Self { config, combiners } = self;
        let started = Local::now();
        let output = output_name.into();
        info!(
            output = %output.display(),
            sources = config.sources.len(),
            resources = config.resources.len() + config.classpath_resources.len(),
            normalize = config.normalize,
            "starting merge"
        );

        let mut run = MergeRun {
            out: OutputCursor::new(out),
            output,
            state: WriterState::Init,
            clock: NormalizationClock::new(config.normalize, started.naive_local()),
            policy: MergePolicy::new(config.include_prefixes.clone()),
            combiners,
            written: DedupRegistry::new(),
            directory: Vec::new(),
            duplicate_mode: config.duplicate_mode,
            summary: MergeSummary::default(),
        };

        if let Some(launcher) = &config.launcher {
            run.write_launcher(launcher).await?;
        }

        run.advance(WriterState::Streaming);
        run.write_headers(&config, started).await?;
        for source in &config.sources {
            run.merge_source(source).await?;
        }
        run.merge_resources(&config.resources).await?;
        for path in &config.classpath_resources {
            run.merge_classpath_resource(path).await?;
        }

        run.advance(WriterState::Finalizing);
        run.flush_combiners().await?;

        run.advance(WriterState::Done);
        let summary = run.finish().await?;
        info!(
            entries = summary.entries,
            bytes = summary.bytes,
            copied = summary.copied,
            duplicates = summary.duplicates,
            "merge finished"
        );
        Ok(summary)
    }
}

/// State owned by one run of the engine.
struct MergeRun<W> {
    out: OutputCursor<W>,
    output: PathBuf,
    state: WriterState,
    clock: NormalizationClock,
    policy: MergePolicy,
    combiners: CombinerRegistry,
    written: DedupRegistry,
    /// Central directory records, in the order their entries were written.
    directory: Vec<CentralDirectoryRecord>,
    duplicate_mode: DuplicateMode,
    summary: MergeSummary,
}

impl<W: AsyncWrite + Unpin> MergeRun<W> {
    fn advance(&mut self, next: WriterState) {
        debug!(from = ?self.state, to = ?next, offset = self.out.position(), "writer state");
        self.state = next;
    }

    async fn write_launcher(&mut self, path: &Path) -> Result<()> {
        let mut launcher = fs::File::open(path)
            .await
            .map_err(|e| MergeError::io(path, e))?;
        let copied = self
            .out
            .copy_from(&mut launcher)
            .await
            .map_err(|e| MergeError::io(path, e))?;
        debug!(launcher = %path.display(), bytes = copied, "copied launcher");
        Ok(())
    }

    /// `META-INF/`, the manifest and the build properties. Their content
    /// depends only on the configuration, so they lead the archive.
    async fn write_headers(
        &mut self,
        config: &MergeConfig,
        started: chrono::DateTime<Local>,
    ) -> Result<()> {
        let mut jar_marker = Vec::new();
        push_extra_block(&mut jar_marker, JAR_MAGIC_EXTRA_ID, &[]);
        self.write_directory(META_INF_DIR, jar_marker).await?;

        let manifest = Manifest::new(config.main_class.clone(), config.manifest_lines.clone());
        self.write_synthesized(MANIFEST_PATH, manifest.render().as_bytes())
            .await?;

        if config.exclude_build_data {
            return Ok(());
        }
        let mut properties = BuildProperties::standard(
            &config.build_target,
            started,
            &config.environment,
            config.normalize,
        );
        for path in &config.build_info_files {
            let text = fs::read_to_string(path)
                .await
                .map_err(|e| MergeError::io(path, e))?;
            properties.merge_text(&text);
        }
        for line in &config.build_info_lines {
            properties.add_line(line);
        }
        self.write_synthesized(BUILD_DATA_PATH, properties.render().as_bytes())
            .await
    }

    async fn merge_source(&mut self, path: &Path) -> Result<()> {
        let mut reader = ArchiveReader::open(path).await?;
        debug!(source = %path.display(), entries = reader.entry_count(), "merging source");

        while let Some(entry) = reader.next_entry().await? {
            let name = entry.name();
            match self.policy.decide(&name, &self.combiners, &self.written) {
                Disposition::Combine => {
                    let data = reader.contents(&entry)?;
                    self.combiners.accept(&name, &data);
                    self.summary.combined += 1;
                }
                Disposition::Drop => {
                    debug!(entry = %name, "dropped");
                    self.summary.dropped += 1;
                }
                Disposition::SkipDuplicate => {
                    if !entry.is_directory() {
                        debug!(entry = %name, source = %path.display(), "duplicate skipped");
                        self.summary.duplicates += 1;
                    }
                }
                Disposition::PassThrough => {
                    self.ensure_parents(&name).await?;
                    let mut record = entry.central;
                    record.disk_number_start = 0;
                    self.write_entry(record, &entry.local.extra, &entry.payload)
                        .await?;
                    self.summary.copied += 1;
                }
            }
        }

        reader.close();
        self.summary.sources += 1;
        Ok(())
    }

    /// Resource specs sharing a target become one entry: concatenated under
    /// [`DuplicateMode::Reject`], first spec only under
    /// [`DuplicateMode::Warn`].
    async fn merge_resources(&mut self, resources: &[ResourceSpec]) -> Result<()> {
        let mut groups: Vec<(&str, Vec<&Path>)> = Vec::new();
        for spec in resources {
            match groups.iter_mut().find(|(target, _)| *target == spec.target()) {
                Some((_, sources)) => sources.push(spec.source()),
                None => groups.push((spec.target(), vec![spec.source()])),
            }
        }

        for (target, sources) in groups {
            let mut data = Vec::new();
            for (index, source) in sources.iter().enumerate() {
                let content = read_input(source).await?;
                if index == 0 || self.duplicate_mode == DuplicateMode::Reject {
                    data.extend_from_slice(&content);
                } else if content != data {
                    warn!(
                        entry = target,
                        ignored = %source.display(),
                        "resource already provided with different content, keeping the first"
                    );
                }
            }
            self.inject(target, &data).await?;
        }
        Ok(())
    }

    async fn merge_classpath_resource(&mut self, path: &Path) -> Result<()> {
        let target = classpath_target(path).ok_or_else(|| {
            MergeError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })?;
        let data = read_input(path).await?;
        self.inject(&target, &data).await
    }

    /// Route a loose file through the policy. A path that was already
    /// written is compared by content instead of being skipped silently.
    async fn inject(&mut self, path: &str, data: &[u8]) -> Result<()> {
        match self.policy.decide(path, &self.combiners, &self.written) {
            Disposition::Combine => {
                self.combiners.accept(path, data);
                self.summary.combined += 1;
            }
            Disposition::Drop => {
                debug!(entry = path, "resource dropped");
                self.summary.dropped += 1;
            }
            Disposition::SkipDuplicate => {
                let outcome = self
                    .written
                    .check(path, Fingerprint::of(data), self.duplicate_mode)?;
                if outcome != DedupOutcome::Identical {
                    self.summary.duplicates += 1;
                }
            }
            Disposition::PassThrough => self.write_synthesized(path, data).await?,
        }
        Ok(())
    }

    async fn flush_combiners(&mut self) -> Result<()> {
        for (path, data) in self.combiners.flush_all() {
            if !self.policy.includes(&path) && !is_always_kept(&path) {
                debug!(entry = %path, "combined entry outside include prefixes");
                self.summary.dropped += 1;
                continue;
            }
            if self.written.contains(&path) {
                warn!(entry = %path, "combined entry would replace one already written, dropping it");
                self.summary.dropped += 1;
                continue;
            }
            self.write_synthesized(&path, &data).await?;
        }
        Ok(())
    }

    /// Write a directory entry for every ancestor of `path` that is missing
    /// and passes the include filter, shallowest first.
    async fn ensure_parents(&mut self, path: &str) -> Result<()> {
        let trimmed = path.trim_end_matches('/');
        for (index, _) in trimmed.match_indices('/') {
            let parent = &path[..=index];
            if self.written.contains(parent) {
                continue;
            }
            if self.policy.includes(parent) || is_always_kept(parent) {
                self.write_directory(parent, Vec::new()).await?;
                self.summary.synthesized_directories += 1;
            }
        }
        Ok(())
    }

    async fn write_directory(&mut self, path: &str, extra: Vec<u8>) -> Result<()> {
        let record = CentralDirectoryRecord {
            version_made_by: VERSION_MADE_BY_UNIX,
            version_needed: VERSION_DEFAULT,
            flags: name_flags(path),
            compression_method: CompressionMethod::Stored.as_u16(),
            modified: DosDateTime::EPOCH,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: DIRECTORY_ATTRIBUTES,
            local_header_offset: 0,
            file_name: path.as_bytes().to_vec(),
            extra: extra.clone(),
            comment: Vec::new(),
        };
        self.write_entry(record, &extra, &[]).await
    }

    /// Write an entry whose content was produced by this run, deflated when
    /// that makes it smaller.
    async fn write_synthesized(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.ensure_parents(path).await?;

        let deflated = deflate(data).map_err(|e| MergeError::io(&self.output, e))?;
        let (method, payload) = if deflated.len() < data.len() {
            (CompressionMethod::Deflate, deflated)
        } else {
            (CompressionMethod::Stored, data.to_vec())
        };
        let fingerprint = Fingerprint::of(data);
        let record = CentralDirectoryRecord {
            version_made_by: VERSION_MADE_BY_UNIX,
            version_needed: VERSION_DEFAULT,
            flags: name_flags(path),
            compression_method: method.as_u16(),
            modified: DosDateTime::EPOCH,
            crc32: fingerprint.crc32,
            compressed_size: payload.len() as u64,
            uncompressed_size: fingerprint.size,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: FILE_ATTRIBUTES,
            local_header_offset: 0,
            file_name: path.as_bytes().to_vec(),
            extra: Vec::new(),
            comment: Vec::new(),
        };
        self.write_entry(record, &[], &payload).await
    }

    /// Emit local header and payload at the current position and remember
    /// the directory record. Offset and timestamp are assigned here.
    async fn write_entry(
        &mut self,
        mut record: CentralDirectoryRecord,
        local_extra: &[u8],
        payload: &[u8],
    ) -> Result<()> {
        let name = record.name();
        record.local_header_offset = self.out.position();
        record.modified = self.clock.stamp(&name);
        record.flags &= !FLAG_DATA_DESCRIPTOR;

        let mut header = Vec::new();
        record
            .to_local_header(local_extra)
            .encode(&mut header)
            .map_err(|e| MergeError::io(&self.output, e))?;
        self.write_out(&header).await?;
        self.write_out(payload).await?;
        debug!(entry = %name, offset = record.local_header_offset, bytes = payload.len(), "wrote entry");

        if record.is_directory() {
            self.written.record_directory(&name);
        } else {
            self.written.record_file(
                &name,
                Fingerprint {
                    size: record.uncompressed_size,
                    crc32: record.crc32,
                },
            );
        }
        self.directory.push(record);
        Ok(())
    }

    /// Central directory, ZIP64 end records when anything overflows, then
    /// the end of central directory record.
    async fn finish(mut self) -> Result<MergeSummary> {
        let cd_offset = self.out.position();
        let mut cd = Vec::with_capacity(self.directory.iter().map(|r| r.encoded_len()).sum());
        for record in &self.directory {
            record
                .encode(&mut cd)
                .map_err(|e| MergeError::io(&self.output, e))?;
        }
        self.write_out(&cd).await?;

        let entries = self.directory.len() as u64;
        let cd_size = cd.len() as u64;
        let eocd64_offset = self.out.position();
        let mut tail = Vec::new();
        encode_end_records(&mut tail, entries, cd_size, cd_offset, eocd64_offset)
            .map_err(|e| MergeError::io(&self.output, e))?;
        self.write_out(&tail).await?;
        self.out
            .flush()
            .await
            .map_err(|e| MergeError::io(&self.output, e))?;

        self.summary.entries = entries;
        self.summary.bytes = self.out.position();
        Ok(self.summary)
    }

    async fn write_out(&mut self, data: &[u8]) -> Result<()> {
        self.out
            .write_all(data)
            .await
            .map_err(|e| MergeError::io(&self.output, e))
    }
}

async fn read_input(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).await.map_err(|e| MergeError::io(path, e))
}

fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// End records for a directory of `entries` records, `cd_size` bytes long,
/// starting at `cd_offset`. `eocd64_offset` is where `out` will land.
fn encode_end_records(
    out: &mut Vec<u8>,
    entries: u64,
    cd_size: u64,
    cd_offset: u64,
    eocd64_offset: u64,
) -> std::io::Result<()> {
    if needs_zip64(entries, cd_size, cd_offset) {
        Zip64EOCD::for_directory(entries, cd_size, cd_offset).encode(out)?;
        Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset,
            total_disks: 1,
        }
        .encode(out)?;
    }
    EndOfCentralDirectory::for_directory(entries, cd_size, cd_offset).encode(out)
}

fn name_flags(path: &str) -> u16 {
    if path.is_ascii() { 0 } else { FLAG_UTF8 }
}

fn needs_zip64(entries: u64, cd_size: u64, cd_offset: u64) -> bool {
    entries >= u64::from(ZIP64_MARKER_16)
        || cd_size >= u64::from(ZIP64_MARKER_32)
        || cd_offset >= u64::from(ZIP64_MARKER_32)
}
