//! On-disk layout of a resource archive.
//!
//! ```text
//! header : "TSRA" | version u32 | entry_count u32 | reserved u32
//! index  : entry_count x (hash u64 | offset u64 | size u32 | stored_size u32 | flags u32)
//! data   : payload blob, record offsets are relative to its start
//! ```
//!
//! All integers are big-endian.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ResourceError, ResourceResult};

pub const MAGIC: [u8; 4] = *b"TSRA";
pub const VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 16;
pub const RECORD_SIZE: usize = 28;

/// `stored_size` marker for entries kept uncompressed.
pub const UNCOMPRESSED: u32 = 0xFFFF_FFFF;

pub const FLAG_ENCRYPTED: u32 = 1 << 0;

/// Upper bound on how much an LZ4 block can expand.
pub const MAX_EXPANSION: u64 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub entry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub hash: u64,
    pub offset: u64,
    pub size: u32,
    pub stored_size: u32,
    pub flags: u32,
}

impl Record {
    pub fn is_compressed(&self) -> bool {
        self.stored_size != UNCOMPRESSED
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Number of payload bytes this record occupies in the data region.
    pub fn stored_len(&self) -> u64 {
        if self.is_compressed() {
            self.stored_size as u64
        } else {
            self.size as u64
        }
    }
}

fn invalid(origin: &str, reason: impl Into<String>) -> ResourceError {
    ResourceError::InvalidFormat {
        origin: origin.to_string(),
        reason: reason.into(),
    }
}

fn truncated(origin: &str, err: io::Error) -> ResourceError {
    invalid(origin, format!("truncated archive: {err}"))
}

pub fn read_header(origin: &str, mut reader: impl Read) -> ResourceResult<Header> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| truncated(origin, e))?;
    if magic != MAGIC {
        return Err(invalid(origin, format!("bad magic {magic:02x?}")));
    }

    let version = reader
        .read_u32::<BigEndian>()
        .map_err(|e| truncated(origin, e))?;
    if version != VERSION {
        return Err(ResourceError::VersionMismatch {
            expected: VERSION,
            found: version,
        });
    }

    let entry_count = reader
        .read_u32::<BigEndian>()
        .map_err(|e| truncated(origin, e))?;
    let _reserved = reader
        .read_u32::<BigEndian>()
        .map_err(|e| truncated(origin, e))?;

    Ok(Header {
        version,
        entry_count,
    })
}

pub fn read_record(origin: &str, mut reader: impl Read) -> ResourceResult<Record> {
    let mut read = || -> io::Result<Record> {
        Ok(Record {
            hash: reader.read_u64::<BigEndian>()?,
            offset: reader.read_u64::<BigEndian>()?,
            size: reader.read_u32::<BigEndian>()?,
            stored_size: reader.read_u32::<BigEndian>()?,
            flags: reader.read_u32::<BigEndian>()?,
        })
    };
    read().map_err(|e| truncated(origin, e))
}

/// Parse and validate the full index of an archive image.
///
/// Returns the records and the byte offset where the data region starts.
pub fn read_index(origin: &str, image: &[u8]) -> ResourceResult<(Vec<Record>, usize)> {
    let mut cursor = image;
    let header = read_header(origin, &mut cursor)?;

    let count = header.entry_count as usize;
    let data_start = count
        .checked_mul(RECORD_SIZE)
        .and_then(|n| n.checked_add(HEADER_SIZE))
        .filter(|&start| start <= image.len())
        .ok_or_else(|| invalid(origin, format!("index of {count} entries exceeds file")))?;
    let data_len = (image.len() - data_start) as u64;

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let record = read_record(origin, &mut cursor)?;

        if let Some(prev) = records.last().map(|r: &Record| r.hash) {
            if record.hash <= prev {
                return Err(invalid(
                    origin,
                    format!("index not sorted or duplicate hash {:#018x}", record.hash),
                ));
            }
        }

        let end = record.offset.checked_add(record.stored_len());
        if end.is_none_or(|end| end > data_len) {
            return Err(invalid(
                origin,
                format!("entry {:#018x} exceeds data region", record.hash),
            ));
        }

        if record.is_compressed()
            && record.size as u64 > (record.stored_size as u64) * MAX_EXPANSION + 16
        {
            return Err(invalid(
                origin,
                format!(
                    "entry {:#018x} claims {} bytes from a {} byte block",
                    record.hash, record.size, record.stored_size
                ),
            ));
        }

        records.push(record);
    }

    Ok((records, data_start))
}

pub fn write_header(mut writer: impl Write, entry_count: u32) -> io::Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_u32::<BigEndian>(VERSION)?;
    writer.write_u32::<BigEndian>(entry_count)?;
    writer.write_u32::<BigEndian>(0)
}

pub fn write_record(mut writer: impl Write, record: &Record) -> io::Result<()> {
    writer.write_u64::<BigEndian>(record.hash)?;
    writer.write_u64::<BigEndian>(record.offset)?;
    writer.write_u32::<BigEndian>(record.size)?;
    writer.write_u32::<BigEndian>(record.stored_size)?;
    writer.write_u32::<BigEndian>(record.flags)
}
