use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Write};

use crate::error::{FormatError, FormatResult};

use super::timestamp::DosDateTime;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// General purpose flag: sizes and CRC follow the payload in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose flag: name is UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

/// Extra field id of the ZIP64 extended information block.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;
/// Extra field id marking an executable jar.
pub const JAR_MAGIC_EXTRA_ID: u16 = 0xCAFE;

/// 32-bit fields holding this value defer to the ZIP64 extra field.
pub const ZIP64_MARKER_32: u32 = 0xFFFF_FFFF;
pub const ZIP64_MARKER_16: u16 = 0xFFFF;

/// Version needed to extract: deflate / directories.
pub const VERSION_DEFAULT: u16 = 20;
/// Version needed to extract: ZIP64.
pub const VERSION_ZIP64: u16 = 45;
/// Version made by: Unix host, APPNOTE 2.0.
pub const VERSION_MADE_BY_UNIX: u16 = (3 << 8) | 20;

/// Data descriptor signature (optional in front of the descriptor).
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> FormatResult<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(FormatError::new("invalid end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Build the record for a single-disk archive, saturating fields that
    /// overflow (a ZIP64 record must then precede it).
    pub fn for_directory(entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        let entries = u16::try_from(entries).unwrap_or(ZIP64_MARKER_16);
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size: saturate_32(cd_size),
            cd_offset: saturate_32(cd_offset),
            comment_len: 0,
        }
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_MARKER_16
            || self.total_entries == ZIP64_MARKER_16
            || self.cd_size == ZIP64_MARKER_32
            || self.cd_offset == ZIP64_MARKER_32
    }

    /// Serialize the record. The comment is always empty.
    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(0)
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> FormatResult<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(FormatError::new("invalid ZIP64 end of central directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        out.write_u64::<LittleEndian>(self.eocd64_offset)?;
        out.write_u32::<LittleEndian>(self.total_disks)
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> FormatResult<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(FormatError::new("invalid ZIP64 end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn for_directory(entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        Self {
            eocd64_size: (Self::MIN_SIZE - 12) as u64,
            version_made_by: (VERSION_MADE_BY_UNIX & 0xFF00) | VERSION_ZIP64,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size,
            cd_offset,
        }
    }

    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u64::<LittleEndian>(self.eocd64_size)?;
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u32::<LittleEndian>(self.disk_number)?;
        out.write_u32::<LittleEndian>(self.disk_with_cd)?;
        out.write_u64::<LittleEndian>(self.disk_entries)?;
        out.write_u64::<LittleEndian>(self.total_entries)?;
        out.write_u64::<LittleEndian>(self.cd_size)?;
        out.write_u64::<LittleEndian>(self.cd_offset)
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// One central directory record. Sizes and offset are the effective values,
/// with any ZIP64 extra field already applied; `extra` keeps the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryRecord {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u64,
    pub file_name: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryRecord {
    /// Entry name, with invalid UTF-8 replaced.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.file_name).into_owned()
    }

    pub fn is_directory(&self) -> bool {
        self.file_name.last() == Some(&b'/')
    }

    /// Whether sizes and CRC are deferred to a trailing data descriptor.
    pub fn defers_sizes(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// Serialized length of this record.
    pub fn encoded_len(&self) -> usize {
        CDFH_MIN_SIZE + self.file_name.len() + self.output_extra().len() + self.comment.len()
    }

    /// Values that overflow their 32-bit fields, in ZIP64 block order.
    fn zip64_values(&self) -> Vec<u64> {
        [self.uncompressed_size, self.compressed_size, self.local_header_offset]
            .into_iter()
            .filter(|v| *v >= u64::from(ZIP64_MARKER_32))
            .collect()
    }

    fn output_extra(&self) -> Vec<u8> {
        with_zip64_extra(&self.extra, &self.zip64_values())
    }

    /// Serialize as a central directory file header.
    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let extra = self.output_extra();
        let version_needed = if self.zip64_values().is_empty() {
            self.version_needed
        } else {
            self.version_needed.max(VERSION_ZIP64)
        };
        out.write_all(CDFH_SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(version_needed)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.compression_method)?;
        out.write_u16::<LittleEndian>(self.modified.time)?;
        out.write_u16::<LittleEndian>(self.modified.date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(saturate_32(self.compressed_size))?;
        out.write_u32::<LittleEndian>(saturate_32(self.uncompressed_size))?;
        out.write_u16::<LittleEndian>(field_len(&self.file_name, "file name")?)?;
        out.write_u16::<LittleEndian>(field_len(&extra, "extra field")?)?;
        out.write_u16::<LittleEndian>(field_len(&self.comment, "file comment")?)?;
        out.write_u16::<LittleEndian>(self.disk_number_start)?;
        out.write_u16::<LittleEndian>(self.internal_attributes)?;
        out.write_u32::<LittleEndian>(self.external_attributes)?;
        out.write_u32::<LittleEndian>(saturate_32(self.local_header_offset))?;
        out.write_all(&self.file_name)?;
        out.write_all(&extra)?;
        out.write_all(&self.comment)
    }

    /// The local header that goes in front of this entry's payload: same
    /// name, method, timestamp, CRC and sizes, never deferring sizes.
    pub fn to_local_header(&self, local_extra: &[u8]) -> LocalHeaderRecord {
        LocalHeaderRecord {
            version_needed: self.version_needed,
            flags: self.flags & !FLAG_DATA_DESCRIPTOR,
            compression_method: self.compression_method,
            modified: self.modified,
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            file_name: self.file_name.clone(),
            extra: strip_zip64_extra(local_extra),
        }
    }
}

/// One local file header. Sizes have any ZIP64 extra field applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeaderRecord {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub file_name: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalHeaderRecord {
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.file_name).into_owned()
    }

    /// Bytes occupied by the header as stored (fixed part, name, extra).
    pub fn stored_len(&self) -> usize {
        LFH_SIZE + self.file_name.len() + self.extra.len()
    }

    fn output_extra(&self) -> Vec<u8> {
        let needs_zip64 = self.uncompressed_size >= u64::from(ZIP64_MARKER_32)
            || self.compressed_size >= u64::from(ZIP64_MARKER_32);
        if needs_zip64 {
            with_zip64_extra(&self.extra, &[self.uncompressed_size, self.compressed_size])
        } else {
            strip_zip64_extra(&self.extra)
        }
    }

    /// Serialize as a local file header. Returns the number of bytes written.
    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<usize> {
        let extra = self.output_extra();
        let zip64 = self.uncompressed_size >= u64::from(ZIP64_MARKER_32)
            || self.compressed_size >= u64::from(ZIP64_MARKER_32);
        let version_needed = if zip64 {
            self.version_needed.max(VERSION_ZIP64)
        } else {
            self.version_needed
        };
        out.write_all(LFH_SIGNATURE)?;
        out.write_u16::<LittleEndian>(version_needed)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.compression_method)?;
        out.write_u16::<LittleEndian>(self.modified.time)?;
        out.write_u16::<LittleEndian>(self.modified.date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(saturate_32(self.compressed_size))?;
        out.write_u32::<LittleEndian>(saturate_32(self.uncompressed_size))?;
        out.write_u16::<LittleEndian>(field_len(&self.file_name, "file name")?)?;
        out.write_u16::<LittleEndian>(field_len(&extra, "extra field")?)?;
        out.write_all(&self.file_name)?;
        out.write_all(&extra)?;
        Ok(LFH_SIZE + self.file_name.len() + extra.len())
    }
}

/// Parsed ZIP file entry information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub local_header_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub external_attributes: u32,
    pub is_directory: bool,
}

impl ArchiveEntry {
    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        self.modified().date_parts()
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        self.modified().time_parts()
    }

    pub fn modified(&self) -> DosDateTime {
        DosDateTime {
            date: self.last_mod_date,
            time: self.last_mod_time,
        }
    }
}

impl From<&CentralDirectoryRecord> for ArchiveEntry {
    fn from(record: &CentralDirectoryRecord) -> Self {
        Self {
            path: record.name(),
            compression_method: CompressionMethod::from_u16(record.compression_method),
            compressed_size: record.compressed_size,
            uncompressed_size: record.uncompressed_size,
            crc32: record.crc32,
            local_header_offset: record.local_header_offset,
            last_mod_time: record.modified.time,
            last_mod_date: record.modified.date,
            external_attributes: record.external_attributes,
            is_directory: record.is_directory(),
        }
    }
}

/// Iterate `(id, data)` blocks of an extra field. A trailing partial block
/// ends the iteration.
pub fn extra_blocks(extra: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    let mut rest = extra;
    std::iter::from_fn(move || {
        if rest.len() < 4 {
            return None;
        }
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let len = usize::from(u16::from_le_bytes([rest[2], rest[3]]));
        if rest.len() < 4 + len {
            return None;
        }
        let data = &rest[4..4 + len];
        rest = &rest[4 + len..];
        Some((id, data))
    })
}

/// Extra field with every ZIP64 block removed.
pub fn strip_zip64_extra(extra: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(extra.len());
    for (id, data) in extra_blocks(extra) {
        if id != ZIP64_EXTRA_ID {
            push_extra_block(&mut out, id, data);
        }
    }
    out
}

/// Extra field with ZIP64 blocks replaced by one carrying `values` (in
/// uncompressed size, compressed size, offset order). No block is added
/// when `values` is empty.
fn with_zip64_extra(extra: &[u8], values: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(extra.len() + 4 + 8 * values.len());
    if !values.is_empty() {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        push_extra_block(&mut out, ZIP64_EXTRA_ID, &data);
    }
    out.extend_from_slice(&strip_zip64_extra(extra));
    out
}

pub fn push_extra_block(out: &mut Vec<u8>, id: u16, data: &[u8]) {
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
}

fn saturate_32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(ZIP64_MARKER_32)
}

fn field_len(field: &[u8], what: &str) -> io::Result<u16> {
    u16::try_from(field.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{what} is {} bytes, more than a header can hold", field.len()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> CentralDirectoryRecord {
        CentralDirectoryRecord {
            version_made_by: VERSION_MADE_BY_UNIX,
            version_needed: VERSION_DEFAULT,
            flags: 0,
            compression_method: 8,
            modified: DosDateTime::EPOCH,
            crc32: 0xDEAD_BEEF,
            compressed_size: 10,
            uncompressed_size: 20,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes: 0o100644 << 16,
            local_header_offset: 1234,
            file_name: name.as_bytes().to_vec(),
            extra: Vec::new(),
            comment: Vec::new(),
        }
    }

    #[test]
    fn eocd_layout_is_exact() {
        let mut buf = Vec::new();
        EndOfCentralDirectory::for_directory(3, 0x100, 0x2000)
            .encode(&mut buf)
            .unwrap();
        assert_eq!(
            buf,
            [
                0x50, 0x4b, 0x05, 0x06, 0, 0, 0, 0, 3, 0, 3, 0, 0x00, 0x01, 0, 0, 0x00, 0x20, 0, 0,
                0, 0
            ]
        );
        let parsed = EndOfCentralDirectory::from_bytes(&buf).unwrap();
        assert_eq!(parsed.total_entries, 3);
        assert!(!parsed.is_zip64());
    }

    #[test]
    fn eocd_saturates_large_values() {
        let eocd = EndOfCentralDirectory::for_directory(70_000, 10, 1 << 33);
        assert!(eocd.is_zip64());
        assert_eq!(eocd.total_entries, ZIP64_MARKER_16);
        assert_eq!(eocd.cd_offset, ZIP64_MARKER_32);
        assert_eq!(eocd.cd_size, 10);
    }

    #[test]
    fn central_record_fixed_fields() {
        let rec = record("a/b.txt");
        let mut buf = Vec::new();
        rec.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), rec.encoded_len());
        assert_eq!(&buf[0..4], CDFH_SIGNATURE);
        assert_eq!(u16::from_le_bytes([buf[10], buf[11]]), 8);
        assert_eq!(u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]), 0xDEAD_BEEF);
        assert_eq!(u32::from_le_bytes([buf[42], buf[43], buf[44], buf[45]]), 1234);
        assert_eq!(&buf[46..], b"a/b.txt");
    }

    #[test]
    fn central_record_large_offset_gets_zip64_block() {
        let mut rec = record("big");
        rec.local_header_offset = 1 << 32;
        let mut buf = Vec::new();
        rec.encode(&mut buf).unwrap();
        assert_eq!(u32::from_le_bytes([buf[42], buf[43], buf[44], buf[45]]), ZIP64_MARKER_32);
        let extra = &buf[46 + 3..];
        let blocks: Vec<_> = extra_blocks(extra).collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].0, ZIP64_EXTRA_ID);
        assert_eq!(blocks[0].1, (1u64 << 32).to_le_bytes());
        assert_eq!(u16::from_le_bytes([buf[6], buf[7]]), VERSION_ZIP64);
    }

    #[test]
    fn local_header_clears_data_descriptor_flag() {
        let mut rec = record("x");
        rec.flags = FLAG_DATA_DESCRIPTOR | FLAG_UTF8;
        let local = rec.to_local_header(&[]);
        assert_eq!(local.flags, FLAG_UTF8);
        let mut buf = Vec::new();
        let written = local.encode(&mut buf).unwrap();
        assert_eq!(written, buf.len());
        assert_eq!(written, LFH_SIZE + 1);
        assert_eq!(u32::from_le_bytes([buf[18], buf[19], buf[20], buf[21]]), 10);
        assert_eq!(u32::from_le_bytes([buf[22], buf[23], buf[24], buf[25]]), 20);
    }

    #[test]
    fn strip_zip64_keeps_other_blocks() {
        let mut extra = Vec::new();
        push_extra_block(&mut extra, ZIP64_EXTRA_ID, &[0; 16]);
        push_extra_block(&mut extra, JAR_MAGIC_EXTRA_ID, &[]);
        push_extra_block(&mut extra, 0x5455, &[1, 2, 3, 4, 5]);
        let stripped = strip_zip64_extra(&extra);
        let ids: Vec<u16> = extra_blocks(&stripped).map(|(id, _)| id).collect();
        assert_eq!(ids, vec![JAR_MAGIC_EXTRA_ID, 0x5455]);
    }

    #[test]
    fn archive_entry_from_record() {
        let entry = ArchiveEntry::from(&record("dir/"));
        assert!(entry.is_directory);
        assert_eq!(entry.compression_method, CompressionMethod::Deflate);
        assert_eq!(entry.mod_date(), (1980, 1, 1));
        assert_eq!(entry.mod_time(), (0, 0, 0));
    }
}
