//! Archive construction for tooling and tests.

use std::collections::BTreeMap;
use std::io::{self, Write};

use super::EncryptFn;
use super::format::{self, Record, UNCOMPRESSED};
use crate::error::{ResourceError, ResourceResult};
use crate::hash::hash_path;

/// How a single payload is stored.
#[derive(Clone, Copy, Default)]
pub struct EntryOptions<'a> {
    /// LZ4-compress the payload. Ignored when compression does not shrink it.
    pub compress: bool,
    /// Encrypt the stored payload in place after compression.
    pub encrypt: Option<&'a EncryptFn>,
}

impl EntryOptions<'_> {
    pub fn compressed() -> Self {
        EntryOptions {
            compress: true,
            encrypt: None,
        }
    }
}

struct PendingEntry {
    size: u32,
    stored_size: u32,
    flags: u32,
    payload: Vec<u8>,
}

/// Collects payloads and writes them out as a sorted archive image.
#[derive(Default)]
pub struct ArchiveBuilder {
    entries: BTreeMap<u64, PendingEntry>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a payload under a name hash.
    pub fn add(&mut self, hash: u64, bytes: &[u8], options: EntryOptions<'_>) -> ResourceResult<()> {
        if self.entries.contains_key(&hash) {
            return Err(ResourceError::AlreadyStored { hash });
        }

        let size = u32::try_from(bytes.len()).map_err(|_| ResourceError::NotSupported {
            reason: format!("payload of {} bytes is too large for an archive entry", bytes.len()),
        })?;

        let mut stored_size = UNCOMPRESSED;
        let mut payload = bytes.to_vec();
        if options.compress {
            let compressed = lz4_flex::block::compress(bytes);
            if compressed.len() < bytes.len() {
                stored_size = compressed.len() as u32;
                payload = compressed;
            }
        }

        let mut flags = 0;
        if let Some(encrypt) = options.encrypt {
            encrypt(&mut payload)?;
            flags |= format::FLAG_ENCRYPTED;
        }

        self.entries.insert(
            hash,
            PendingEntry {
                size,
                stored_size,
                flags,
                payload,
            },
        );
        Ok(())
    }

    /// Add a payload under the hash of its resource path.
    pub fn add_path(&mut self, path: &str, bytes: &[u8], options: EntryOptions<'_>) -> ResourceResult<()> {
        self.add(hash_path(path), bytes, options)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to(&self, mut writer: impl Write) -> io::Result<()> {
        format::write_header(&mut writer, self.entries.len() as u32)?;

        let mut offset = 0u64;
        for (&hash, entry) in &self.entries {
            let record = Record {
                hash,
                offset,
                size: entry.size,
                stored_size: entry.stored_size,
                flags: entry.flags,
            };
            format::write_record(&mut writer, &record)?;
            offset += entry.payload.len() as u64;
        }

        for entry in self.entries.values() {
            writer.write_all(&entry.payload)?;
        }
        writer.flush()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let data_len: usize = self.entries.values().map(|e| e.payload.len()).sum();
        let mut out = Vec::with_capacity(
            format::HEADER_SIZE + self.entries.len() * format::RECORD_SIZE + data_len,
        );
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveIndex;

    #[test]
    fn test_duplicate_hash() {
        let mut builder = ArchiveBuilder::new();
        builder.add(1, b"a", EntryOptions::default()).unwrap();
        assert!(matches!(
            builder.add(1, b"b", EntryOptions::default()),
            Err(ResourceError::AlreadyStored { hash: 1 })
        ));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_incompressible_stored_raw() {
        let mut builder = ArchiveBuilder::new();
        builder.add(1, b"xy", EntryOptions::compressed()).unwrap();

        let index = ArchiveIndex::from_memory([builder.to_bytes()]).unwrap();
        let entry = index.lookup(1).unwrap();
        assert!(!entry.compressed);
        assert_eq!(entry.stored_size, 2);
    }

    #[test]
    fn test_records_sorted() {
        let mut builder = ArchiveBuilder::new();
        for hash in [9u64, 3, 5] {
            builder.add(hash, &hash.to_be_bytes(), EntryOptions::default()).unwrap();
        }
        let index = ArchiveIndex::from_memory([builder.to_bytes()]).unwrap();
        let hashes: Vec<u64> = index.entries().map(|e| e.hash).collect();
        assert_eq!(hashes, vec![3, 5, 9]);
    }

    #[test]
    fn test_add_path() {
        let mut builder = ArchiveBuilder::new();
        builder.add_path("a.tex", b"tex", EntryOptions::default()).unwrap();
        let index = ArchiveIndex::from_memory([builder.to_bytes()]).unwrap();
        assert!(index.contains(hash_path("a.tex")));
    }
}
