//! Low-level ZIP record parsing over byte slices.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) in the file's tail
//! 2. If ZIP64, follow the locator to the ZIP64 EOCD
//! 3. Parse the Central Directory records in stored order
//! 4. For each entry, parse its Local File Header to find the payload
//!
//! Everything here is pure: callers fetch the bytes (see
//! [`ArchiveReader`](super::ArchiveReader)) and these functions validate them.
//! The tail is untrusted, so the EOCD search never looks further back than
//! the largest possible archive comment.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::ops::Range;

use crate::error::{FormatError, FormatResult};

use super::structures::*;
use super::timestamp::DosDateTime;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
pub const MAX_COMMENT_SIZE: usize = 65535;

/// Number of trailing bytes that can contain the EOCD record.
pub const MAX_TAIL_SIZE: usize = MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE;

/// Where an archive's central directory lives, with all ZIP64 indirection
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLocation {
    /// Absolute offset of the first directory record.
    pub offset: u64,
    pub size: u64,
    pub entries: u64,
    /// Bytes in front of the archive proper (e.g. a launcher stub written
    /// with archive-relative offsets). Added to every recorded offset.
    pub prefix_len: u64,
}

/// Find the EOCD record in the trailing bytes of an archive.
///
/// Returns the record and its index in `tail`. Only the last
/// [`MAX_TAIL_SIZE`] bytes of `tail` are searched.
pub fn find_eocd(tail: &[u8]) -> FormatResult<(EndOfCentralDirectory, usize)> {
    let size = EndOfCentralDirectory::SIZE;
    if tail.len() < size {
        return Err(FormatError::new("not a valid ZIP file: too short"));
    }

    // Common case first: no comment.
    let simple = tail.len() - size;
    if &tail[simple..simple + 4] == EndOfCentralDirectory::SIGNATURE
        && tail[simple + 20..simple + 22] == [0, 0]
    {
        return Ok((EndOfCentralDirectory::from_bytes(&tail[simple..])?, simple));
    }

    // Search backwards; the comment length must account for every byte
    // after the record.
    let floor = tail.len().saturating_sub(MAX_TAIL_SIZE);
    for i in (floor..=simple).rev() {
        if &tail[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
            let comment_len = usize::from(u16::from_le_bytes([tail[i + 20], tail[i + 21]]));
            if comment_len == tail.len() - i - size {
                return Ok((EndOfCentralDirectory::from_bytes(&tail[i..])?, i));
            }
        }
    }

    Err(FormatError::new(
        "not a valid ZIP file: end of central directory signature not found",
    ))
}

/// Validate the directory bounds recorded in the EOCD (and ZIP64 EOCD, if
/// any) against the archive size.
///
/// `end_record_offset` is the absolute position of the EOCD record, or of
/// the ZIP64 EOCD record when one is given. The directory must end at or
/// before it; any gap is treated as prepended data.
pub fn resolve_directory(
    eocd: &EndOfCentralDirectory,
    zip64: Option<&Zip64EOCD>,
    end_record_offset: u64,
) -> FormatResult<DirectoryLocation> {
    let (offset, size, entries) = match zip64 {
        Some(z) => (z.cd_offset, z.cd_size, z.total_entries),
        None => (
            u64::from(eocd.cd_offset),
            u64::from(eocd.cd_size),
            u64::from(eocd.total_entries),
        ),
    };
    if eocd.disk_number != eocd.disk_with_cd || eocd.disk_entries != eocd.total_entries {
        return Err(FormatError::new("multi-disk archives are not supported"));
    }

    let recorded_end = offset
        .checked_add(size)
        .ok_or_else(|| FormatError::new("central directory bounds overflow"))?;
    if recorded_end > end_record_offset {
        return Err(FormatError::new(format!(
            "central directory at {offset}+{size} runs past the end record at {end_record_offset}"
        )));
    }
    let prefix_len = end_record_offset - recorded_end;
    if entries.saturating_mul(CDFH_MIN_SIZE as u64) > size {
        return Err(FormatError::new(format!(
            "central directory of {size} bytes cannot hold {entries} entries"
        )));
    }

    Ok(DirectoryLocation {
        offset: offset + prefix_len,
        size,
        entries,
        prefix_len,
    })
}

/// Parse `count` consecutive central directory records.
///
/// Each record comes with its byte range, relative to the start of `data`.
/// `prefix_len` is added to every local header offset.
pub fn parse_directory_records(
    data: &[u8],
    count: u64,
    prefix_len: u64,
) -> FormatResult<Vec<(CentralDirectoryRecord, Range<usize>)>> {
    let mut records = Vec::with_capacity(count.min(data.len() as u64 / CDFH_MIN_SIZE as u64) as usize);
    let mut cursor = Cursor::new(data);

    for index in 0..count {
        let start = cursor.position() as usize;
        let mut record = parse_cdfh(&mut cursor).map_err(|e| {
            if e.entry.is_none() {
                FormatError::new(format!("central directory record #{index}: {}", e.message))
            } else {
                e
            }
        })?;
        record.local_header_offset = record
            .local_header_offset
            .checked_add(prefix_len)
            .ok_or_else(|| FormatError::in_entry(record.name(), "local header offset overflow"))?;
        records.push((record, start..cursor.position() as usize));
    }

    Ok(records)
}

/// Parse every central directory record of a fully buffered archive.
pub fn parse_central_directory(
    archive: &[u8],
) -> FormatResult<Vec<(CentralDirectoryRecord, Range<usize>)>> {
    let tail_start = archive.len().saturating_sub(MAX_TAIL_SIZE);
    let (eocd, index) = find_eocd(&archive[tail_start..])?;
    let eocd_offset = (tail_start + index) as u64;

    let (zip64, end_record_offset) = if eocd.is_zip64() {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| FormatError::new("ZIP64 locator missing"))?;
        let locator = Zip64EOCDLocator::from_bytes(slice_at(archive, locator_offset, Zip64EOCDLocator::SIZE)?)?;
        let record = Zip64EOCD::from_bytes(slice_at(archive, locator.eocd64_offset, Zip64EOCD::MIN_SIZE)?)?;
        (Some(record), locator.eocd64_offset)
    } else {
        (None, eocd_offset)
    };

    let location = resolve_directory(&eocd, zip64.as_ref(), end_record_offset)?;
    let directory = slice_at(archive, location.offset, location.size as usize)?;
    let records = parse_directory_records(directory, location.entries, location.prefix_len)?;
    let base = location.offset as usize;
    Ok(records
        .into_iter()
        .map(|(record, range)| (record, range.start + base..range.end + base))
        .collect())
}

/// Parse a Central Directory File Header from a cursor.
///
/// The record's declared name/extra/comment lengths must fit in the
/// remaining buffer.
pub fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> FormatResult<CentralDirectoryRecord> {
    // Read and verify the signature (PK\x01\x02)
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(FormatError::new("invalid central directory file header signature"));
    }

    // Read fixed-size header fields
    let version_made_by = cursor.read_u16::<LittleEndian>()?;
    let version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let internal_attributes = cursor.read_u16::<LittleEndian>()?;
    let external_attributes = cursor.read_u32::<LittleEndian>()?;
    let lfh_offset = cursor.read_u32::<LittleEndian>()?;

    let variable_len = u64::from(file_name_length)
        + u64::from(extra_field_length)
        + u64::from(file_comment_length);
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if variable_len > remaining {
        return Err(FormatError::new(format!(
            "central directory record declares {variable_len} variable bytes but only {remaining} remain"
        )));
    }

    let file_name = read_vec(cursor, file_name_length)?;
    let extra = read_vec(cursor, extra_field_length)?;
    let comment = read_vec(cursor, file_comment_length)?;
    if file_name.is_empty() {
        return Err(FormatError::new("central directory record with empty name"));
    }

    let mut record = CentralDirectoryRecord {
        version_made_by,
        version_needed,
        flags,
        compression_method,
        modified: DosDateTime {
            date: last_mod_date,
            time: last_mod_time,
        },
        crc32,
        compressed_size: u64::from(compressed_size),
        uncompressed_size: u64::from(uncompressed_size),
        disk_number_start,
        internal_attributes,
        external_attributes,
        local_header_offset: u64::from(lfh_offset),
        file_name,
        extra,
        comment,
    };

    // ZIP64 extended information: a field is present only if the
    // corresponding header field is 0xFFFFFFFF.
    if let Some(zip64) = zip64_block(&record.extra) {
        let mut values = Cursor::new(zip64);
        let short = || FormatError::in_entry(record.name(), "short ZIP64 extra field");
        let marker = u64::from(ZIP64_MARKER_32);
        let mut uncompressed = record.uncompressed_size;
        let mut compressed = record.compressed_size;
        let mut offset = record.local_header_offset;
        if uncompressed == marker {
            uncompressed = values.read_u64::<LittleEndian>().map_err(|_| short())?;
        }
        if compressed == marker {
            compressed = values.read_u64::<LittleEndian>().map_err(|_| short())?;
        }
        if offset == marker {
            offset = values.read_u64::<LittleEndian>().map_err(|_| short())?;
        }
        record.uncompressed_size = uncompressed;
        record.compressed_size = compressed;
        record.local_header_offset = offset;
    }

    Ok(record)
}

/// Parse the Local File Header starting at `offset` in `data`.
pub fn parse_local_header(data: &[u8], offset: usize) -> FormatResult<LocalHeaderRecord> {
    let fixed = data
        .get(offset..)
        .filter(|rest| rest.len() >= LFH_SIZE)
        .ok_or_else(|| FormatError::new(format!("truncated local file header at {offset}")))?;
    if &fixed[0..4] != LFH_SIGNATURE {
        return Err(FormatError::new(format!(
            "invalid local file header signature at {offset}"
        )));
    }

    let mut cursor = Cursor::new(&fixed[4..LFH_SIZE]);
    let version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = cursor.read_u32::<LittleEndian>()?;
    let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;

    let name_end = LFH_SIZE + usize::from(file_name_length);
    let extra_end = name_end + usize::from(extra_field_length);
    if fixed.len() < extra_end {
        return Err(FormatError::new(format!(
            "local file header at {offset} runs past the end of the buffer"
        )));
    }

    let mut record = LocalHeaderRecord {
        version_needed,
        flags,
        compression_method,
        modified: DosDateTime {
            date: last_mod_date,
            time: last_mod_time,
        },
        crc32,
        compressed_size: u64::from(compressed_size),
        uncompressed_size: u64::from(uncompressed_size),
        file_name: fixed[LFH_SIZE..name_end].to_vec(),
        extra: fixed[name_end..extra_end].to_vec(),
    };

    // Local ZIP64 blocks carry both sizes, uncompressed first.
    if let Some(zip64) = zip64_block(&record.extra) {
        let mut values = Cursor::new(zip64);
        let marker = u64::from(ZIP64_MARKER_32);
        if record.uncompressed_size == marker {
            record.uncompressed_size = values.read_u64::<LittleEndian>()?;
        }
        if record.compressed_size == marker {
            record.compressed_size = values.read_u64::<LittleEndian>()?;
        }
    }

    Ok(record)
}

/// Variable part length of the local header whose fixed part is `fixed`.
pub fn local_header_variable_len(fixed: &[u8]) -> FormatResult<usize> {
    if fixed.len() < LFH_SIZE || &fixed[0..4] != LFH_SIGNATURE {
        return Err(FormatError::new("invalid local file header"));
    }
    let name = u16::from_le_bytes([fixed[26], fixed[27]]);
    let extra = u16::from_le_bytes([fixed[28], fixed[29]]);
    Ok(usize::from(name) + usize::from(extra))
}

fn zip64_block(extra: &[u8]) -> Option<&[u8]> {
    extra_blocks(extra)
        .find(|(id, _)| *id == ZIP64_EXTRA_ID)
        .map(|(_, data)| data)
}

fn read_vec(cursor: &mut Cursor<&[u8]>, len: u16) -> FormatResult<Vec<u8>> {
    let mut buf = vec![0u8; usize::from(len)];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn slice_at(data: &[u8], offset: u64, len: usize) -> FormatResult<&[u8]> {
    usize::try_from(offset)
        .ok()
        .and_then(|start| data.get(start..start.checked_add(len)?))
        .ok_or_else(|| FormatError::new(format!("{len} bytes at offset {offset} are out of bounds")))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a stored-only archive with the given entries.
    fn build_archive(prefix: &[u8], entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = prefix.to_vec();
        let mut records = Vec::new();
        for (name, data) in entries {
            let mut crc = flate2::Crc::new();
            crc.update(data);
            let record = CentralDirectoryRecord {
                version_made_by: VERSION_MADE_BY_UNIX,
                version_needed: VERSION_DEFAULT,
                flags: 0,
                compression_method: 0,
                modified: DosDateTime::EPOCH,
                crc32: crc.sum(),
                compressed_size: data.len() as u64,
                uncompressed_size: data.len() as u64,
                disk_number_start: 0,
                internal_attributes: 0,
                external_attributes: 0,
                // Offsets relative to the archive proper, not the prefix.
                local_header_offset: (out.len() - prefix.len()) as u64,
                file_name: name.as_bytes().to_vec(),
                extra: Vec::new(),
                comment: Vec::new(),
            };
            record.to_local_header(&[]).encode(&mut out).unwrap();
            out.extend_from_slice(data);
            records.push(record);
        }
        let cd_offset = (out.len() - prefix.len()) as u64;
        let mut cd = Vec::new();
        for record in &records {
            record.encode(&mut cd).unwrap();
        }
        out.extend_from_slice(&cd);
        EndOfCentralDirectory::for_directory(records.len() as u64, cd.len() as u64, cd_offset)
            .encode(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn parses_directory_in_stored_order() {
        let archive = build_archive(b"", &[("a.txt", b"alpha"), ("dir/", b""), ("dir/b.txt", b"bravo!")]);
        let records = parse_central_directory(&archive).unwrap();
        let names: Vec<String> = records.iter().map(|(r, _)| r.name()).collect();
        assert_eq!(names, ["a.txt", "dir/", "dir/b.txt"]);
        assert_eq!(records[0].0.local_header_offset, 0);
        assert_eq!(records[2].0.uncompressed_size, 6);
        assert!(records[1].0.is_directory());

        let (first, range) = &records[0];
        assert_eq!(&archive[range.start..range.start + 4], CDFH_SIGNATURE);
        assert_eq!(range.len(), first.encoded_len());
    }

    #[test]
    fn local_header_agrees_with_directory() {
        let archive = build_archive(b"", &[("x/y.class", b"cafebabe")]);
        let records = parse_central_directory(&archive).unwrap();
        let (record, _) = &records[0];
        let local = parse_local_header(&archive, record.local_header_offset as usize).unwrap();
        assert_eq!(local.file_name, record.file_name);
        assert_eq!(local.compressed_size, 8);
        assert_eq!(local.crc32, record.crc32);
        assert_eq!(local.stored_len(), LFH_SIZE + "x/y.class".len());
    }

    #[test]
    fn finds_eocd_behind_comment() {
        let mut archive = build_archive(b"", &[("a", b"1")]);
        let comment = b"built by hand";
        let len = archive.len();
        archive[len - 2..].copy_from_slice(&(comment.len() as u16).to_le_bytes());
        archive.extend_from_slice(comment);
        let (eocd, index) = find_eocd(&archive).unwrap();
        assert_eq!(eocd.total_entries, 1);
        assert_eq!(index, len - EndOfCentralDirectory::SIZE);
        assert_eq!(parse_central_directory(&archive).unwrap().len(), 1);
    }

    #[test]
    fn missing_eocd_is_a_format_error() {
        let err = parse_central_directory(b"definitely not a zip archive").unwrap_err();
        assert!(err.message.contains("not a valid ZIP file"), "{err}");
    }

    #[test]
    fn eocd_search_is_bounded() {
        let mut archive = build_archive(b"", &[("a", b"1")]);
        archive.extend(std::iter::repeat_n(0u8, MAX_COMMENT_SIZE + 1));
        assert!(parse_central_directory(&archive).is_err());
    }

    #[test]
    fn directory_offset_out_of_bounds() {
        let mut archive = build_archive(b"", &[("a", b"1")]);
        let len = archive.len();
        // cd_offset field of the EOCD
        archive[len - 6..len - 2].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
        let err = parse_central_directory(&archive).unwrap_err();
        assert!(err.message.contains("runs past"), "{err}");
    }

    #[test]
    fn record_overrunning_directory_is_rejected() {
        let archive = build_archive(b"", &[("abc", b"1")]);
        let records = parse_central_directory(&archive).unwrap();
        let range = records[0].1.clone();
        let mut directory = archive[range].to_vec();
        // Claim a 200-byte comment that is not there.
        directory[32..34].copy_from_slice(&200u16.to_le_bytes());
        let err = parse_directory_records(&directory, 1, 0).unwrap_err();
        assert!(err.message.contains("variable bytes"), "{err}");
    }

    #[test]
    fn prepended_data_shifts_offsets() {
        let prefix = b"#!/bin/sh\nexec java -jar $0\n";
        let archive = build_archive(prefix, &[("a", b"1"), ("b", b"22")]);
        let records = parse_central_directory(&archive).unwrap();
        assert_eq!(records[0].0.local_header_offset, prefix.len() as u64);
        let local = parse_local_header(&archive, records[1].0.local_header_offset as usize).unwrap();
        assert_eq!(local.name(), "b");
    }

    #[test]
    fn local_header_errors() {
        let archive = build_archive(b"", &[("a", b"1")]);
        let err = parse_local_header(&archive, 1).unwrap_err();
        assert!(err.message.contains("signature"), "{err}");
        let err = parse_local_header(&archive[..20], 0).unwrap_err();
        assert!(err.message.contains("truncated"), "{err}");
        let err = parse_local_header(&archive[..LFH_SIZE], 0).unwrap_err();
        assert!(err.message.contains("runs past"), "{err}");
    }

    #[test]
    fn zip64_extra_overrides_sizes() {
        let archive = build_archive(b"", &[("big", b"0123")]);
        let mut record = parse_central_directory(&archive).unwrap().remove(0).0;
        record.uncompressed_size = 5_000_000_000;
        let mut encoded = Vec::new();
        record.encode(&mut encoded).unwrap();
        let parsed = parse_directory_records(&encoded, 1, 0).unwrap();
        assert_eq!(parsed[0].0.uncompressed_size, 5_000_000_000);
        assert_eq!(parsed[0].0.compressed_size, 4);
        assert_eq!(parsed[0].0.local_header_offset, 0);
    }
}
