use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use tracing::debug;

use crate::error::{FormatError, MergeError, Result};
use crate::io::{LocalFileReader, ReadAt};

use super::parser::{
    find_eocd, local_header_variable_len, parse_directory_records, parse_local_header,
    resolve_directory, MAX_TAIL_SIZE,
};
use super::structures::*;

/// One member of a source archive: its directory record, its local header
/// and the raw (possibly compressed) payload bytes.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub central: CentralDirectoryRecord,
    pub local: LocalHeaderRecord,
    pub payload: Vec<u8>,
}

impl SourceEntry {
    pub fn name(&self) -> String {
        self.central.name()
    }

    pub fn is_directory(&self) -> bool {
        self.central.is_directory()
    }

    pub fn entry(&self) -> ArchiveEntry {
        ArchiveEntry::from(&self.central)
    }
}

/// Forward-only cursor over the entries of one archive, in central
/// directory order.
///
/// The directory is read once when the reader is created; each call to
/// [`next_entry`](Self::next_entry) then fetches one local header and
/// payload. The underlying handle is released when the reader is dropped
/// or [`close`](Self::close)d.
pub struct ArchiveReader<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Name used in error reports
    path: PathBuf,
    /// Total size of the archive in bytes
    size: u64,
    /// Payloads must end before this offset (start of the directory)
    data_end: u64,
    total: u64,
    records: std::vec::IntoIter<CentralDirectoryRecord>,
}

impl ArchiveReader<LocalFileReader> {
    /// Open an archive on the local filesystem.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = LocalFileReader::new(path).map_err(|e| MergeError::io(path, e))?;
        Self::new(Arc::new(file), path).await
    }
}

impl<R: ReadAt> ArchiveReader<R> {
    /// Read the end records and central directory of `reader`. `path` only
    /// names the archive in errors and logs.
    pub async fn new(reader: Arc<R>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let size = reader.size();
        let fmt = |e: FormatError| MergeError::format(&path, e);
        let io = |e: std::io::Error| MergeError::io(&path, e);

        // Only the tail can hold the EOCD; never read further back.
        let tail_len = size.min(MAX_TAIL_SIZE as u64);
        let tail_start = size - tail_len;
        let mut tail = vec![0u8; tail_len as usize];
        reader.read_exact_at(tail_start, &mut tail).await.map_err(io)?;
        let (eocd, index) = find_eocd(&tail).map_err(fmt)?;
        let eocd_offset = tail_start + index as u64;
        drop(tail);

        let (zip64, end_record_offset) = if eocd.is_zip64() {
            let locator_offset = eocd_offset
                .checked_sub(Zip64EOCDLocator::SIZE as u64)
                .ok_or_else(|| fmt(FormatError::new("ZIP64 locator missing")))?;
            let mut locator_buf = [0u8; Zip64EOCDLocator::SIZE];
            reader
                .read_exact_at(locator_offset, &mut locator_buf)
                .await
                .map_err(io)?;
            let locator = Zip64EOCDLocator::from_bytes(&locator_buf).map_err(fmt)?;
            let eocd64_end = locator.eocd64_offset.checked_add(Zip64EOCD::MIN_SIZE as u64);
            if eocd64_end.is_none_or(|end| end > locator_offset) {
                return Err(fmt(FormatError::new("ZIP64 end record out of bounds")));
            }
            let mut eocd64_buf = [0u8; Zip64EOCD::MIN_SIZE];
            reader
                .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
                .await
                .map_err(io)?;
            let eocd64 = Zip64EOCD::from_bytes(&eocd64_buf).map_err(fmt)?;
            (Some(eocd64), locator.eocd64_offset)
        } else {
            (None, eocd_offset)
        };

        let location = resolve_directory(&eocd, zip64.as_ref(), end_record_offset).map_err(fmt)?;

        // Read the entire Central Directory in one request
        let cd_len = usize::try_from(location.size)
            .map_err(|_| fmt(FormatError::new("central directory too large")))?;
        let mut cd_data = vec![0u8; cd_len];
        reader
            .read_exact_at(location.offset, &mut cd_data)
            .await
            .map_err(io)?;
        let records = parse_directory_records(&cd_data, location.entries, location.prefix_len)
            .map_err(fmt)?;

        debug!(
            archive = %path.display(),
            entries = location.entries,
            prefix = location.prefix_len,
            "opened archive"
        );

        Ok(Self {
            reader,
            path,
            size,
            data_end: location.offset,
            total: location.entries,
            records: records
                .into_iter()
                .map(|(record, _)| record)
                .collect::<Vec<_>>()
                .into_iter(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries recorded in the central directory.
    pub fn entry_count(&self) -> u64 {
        self.total
    }

    /// Size of the whole archive in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Fetch the next entry, or `None` once the directory is exhausted.
    ///
    /// Unless the directory record defers sizes to a data descriptor, the
    /// local header must agree with it on name and sizes.
    pub async fn next_entry(&mut self) -> Result<Option<SourceEntry>> {
        let Some(central) = self.records.next() else {
            return Ok(None);
        };
        let name = central.name();
        let fmt = |message: String| MergeError::format(&self.path, FormatError::in_entry(&name, message));

        let offset = central.local_header_offset;
        let fixed_end = match offset.checked_add(LFH_SIZE as u64) {
            Some(end) if end <= self.data_end => end,
            _ => {
                return Err(fmt(format!(
                    "local header offset {offset} is past the start of the central directory"
                )));
            }
        };

        // Read the fixed part first; it tells how long the rest is.
        let mut fixed = [0u8; LFH_SIZE];
        self.read_exact_at(offset, &mut fixed).await?;
        let variable = local_header_variable_len(&fixed)
            .map_err(|e| MergeError::format(&self.path, e.with_entry(&name)))?;
        if fixed_end + variable as u64 > self.data_end {
            return Err(fmt(format!(
                "local header at {offset} declares {variable} name and extra bytes past the start of the central directory"
            )));
        }
        let mut header = vec![0u8; LFH_SIZE + variable];
        header[..LFH_SIZE].copy_from_slice(&fixed);
        self.read_exact_at(fixed_end, &mut header[LFH_SIZE..]).await?;
        let local = parse_local_header(&header, 0)
            .map_err(|e| MergeError::format(&self.path, e.with_entry(&name)))?;

        if local.file_name != central.file_name {
            return Err(fmt(format!(
                "local header names `{}` instead",
                local.name()
            )));
        }
        if !central.defers_sizes()
            && (local.compressed_size != central.compressed_size
                || local.uncompressed_size != central.uncompressed_size)
        {
            return Err(fmt(format!(
                "local header sizes {}/{} disagree with directory sizes {}/{}",
                local.compressed_size,
                local.uncompressed_size,
                central.compressed_size,
                central.uncompressed_size
            )));
        }

        // With a data descriptor the payload still starts right after the
        // header; its length comes from the directory record.
        let data_offset = offset + header.len() as u64;
        let data_end = data_offset.checked_add(central.compressed_size);
        if data_end.is_none_or(|end| end > self.data_end) {
            return Err(fmt(format!(
                "payload of {} bytes at {data_offset} runs into the central directory",
                central.compressed_size
            )));
        }
        let payload_len = usize::try_from(central.compressed_size)
            .map_err(|_| fmt("payload too large for this platform".to_string()))?;
        let mut payload = vec![0u8; payload_len];
        self.read_exact_at(data_offset, &mut payload).await?;

        Ok(Some(SourceEntry {
            central,
            local,
            payload,
        }))
    }

    /// Decompress an entry's payload and verify its CRC.
    ///
    /// Only STORED and DEFLATE payloads can be decoded.
    pub fn contents(&self, entry: &SourceEntry) -> Result<Vec<u8>> {
        let central = &entry.central;
        let corrupt = |message: String| {
            MergeError::format(&self.path, FormatError::in_entry(central.name(), message))
        };

        let data = match CompressionMethod::from_u16(central.compression_method) {
            CompressionMethod::Stored => entry.payload.clone(),
            CompressionMethod::Deflate => {
                let capacity = usize::try_from(central.uncompressed_size).unwrap_or(0);
                let mut data = Vec::with_capacity(capacity.min(64 << 20));
                DeflateDecoder::new(entry.payload.as_slice())
                    .read_to_end(&mut data)
                    .map_err(|e| corrupt(format!("cannot inflate payload: {e}")))?;
                data
            }
            CompressionMethod::Unknown(method) => {
                return Err(MergeError::Unsupported {
                    path: self.path.clone(),
                    entry: central.name(),
                    method,
                });
            }
        };

        if data.len() as u64 != central.uncompressed_size {
            return Err(corrupt(format!(
                "decoded {} bytes, directory says {}",
                data.len(),
                central.uncompressed_size
            )));
        }
        let mut crc = flate2::Crc::new();
        crc.update(&data);
        if crc.sum() != central.crc32 {
            return Err(corrupt(format!(
                "CRC mismatch: computed {:08x}, directory says {:08x}",
                crc.sum(),
                central.crc32
            )));
        }
        Ok(data)
    }

    /// Release the underlying source.
    pub fn close(self) {
        debug!(archive = %self.path.display(), "closed archive");
    }

    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.reader
            .read_exact_at(offset, buf)
            .await
            .map_err(|e| MergeError::io(&self.path, e))
    }
}
