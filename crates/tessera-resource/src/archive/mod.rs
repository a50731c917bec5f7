//! Read-only archive index.
//!
//! One or more archive images are mounted in declaration order. Each image
//! holds an index sorted by name hash, so lookups are a binary search per
//! archive and the first archive containing a hash wins.

mod builder;
pub(crate) mod format;

use std::path::Path;

use bytes::Bytes;
use lz4_flex::block::DecompressError;
use tessera_core::profiling::profile_function;

pub use builder::{ArchiveBuilder, EntryOptions};

use crate::error::{ResourceError, ResourceResult};

/// In-place decrypt hook applied to encrypted archive payloads.
pub type DecryptFn = dyn Fn(&mut [u8]) -> ResourceResult<()> + Send + Sync;

/// In-place encrypt hook used when building archives.
pub type EncryptFn = dyn Fn(&mut [u8]) -> ResourceResult<()> + Send + Sync;

/// Location and encoding of one payload in a mounted archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub hash: u64,
    /// Offset into the archive's data region.
    pub offset: u64,
    /// Size of the payload once decoded.
    pub size: u32,
    /// Size of the payload as stored.
    pub stored_size: u32,
    pub compressed: bool,
    pub encrypted: bool,
    /// Index of the archive holding the entry, in mount order.
    pub archive: u32,
}

impl ArchiveEntry {
    fn from_record(record: &format::Record, archive: u32) -> Self {
        ArchiveEntry {
            hash: record.hash,
            offset: record.offset,
            size: record.size,
            stored_size: record.stored_len() as u32,
            compressed: record.is_compressed(),
            encrypted: record.is_encrypted(),
            archive,
        }
    }
}

struct MountedArchive {
    origin: String,
    entries: Vec<ArchiveEntry>,
    data: Bytes,
}

/// Mapping from name hash to payload across a set of mounted archives.
#[derive(Default)]
pub struct ArchiveIndex {
    archives: Vec<MountedArchive>,
}

impl ArchiveIndex {
    /// An index with no archives. Every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read and mount archive files, in order.
    pub fn open<I, P>(paths: I) -> ResourceResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut index = Self::empty();
        for path in paths {
            let path = path.as_ref();
            let image = std::fs::read(path).map_err(|source| ResourceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            index.push(path.display().to_string(), Bytes::from(image))?;
        }
        Ok(index)
    }

    /// Mount in-memory archive images, in order.
    pub fn from_memory<I, B>(images: I) -> ResourceResult<Self>
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let mut index = Self::empty();
        for (i, image) in images.into_iter().enumerate() {
            index.push(format!("memory:{i}"), image.into())?;
        }
        Ok(index)
    }

    fn push(&mut self, origin: String, image: Bytes) -> ResourceResult<()> {
        let (records, data_start) = format::read_index(&origin, &image)?;
        let archive = self.archives.len() as u32;
        let entries = records
            .iter()
            .map(|record| ArchiveEntry::from_record(record, archive))
            .collect::<Vec<_>>();

        tracing::debug!("Mounted archive '{}' ({} entries)", origin, entries.len());

        self.archives.push(MountedArchive {
            origin,
            entries,
            data: image.slice(data_start..),
        });
        Ok(())
    }

    /// Find the entry for a hash. The first archive in mount order wins.
    pub fn lookup(&self, hash: u64) -> Option<ArchiveEntry> {
        self.archives.iter().find_map(|archive| {
            archive
                .entries
                .binary_search_by_key(&hash, |entry| entry.hash)
                .ok()
                .map(|i| archive.entries[i])
        })
    }

    /// Like [`lookup`](Self::lookup), but a miss is an error.
    pub fn find(&self, hash: u64) -> ResourceResult<ArchiveEntry> {
        self.lookup(hash)
            .ok_or_else(|| ResourceError::hash_not_found(hash))
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.lookup(hash).is_some()
    }

    /// Decode an entry's payload: decrypt, then decompress.
    ///
    /// Plain entries are returned without copying.
    pub fn read(&self, entry: &ArchiveEntry, decrypt: Option<&DecryptFn>) -> ResourceResult<Bytes> {
        profile_function!();
        let (origin, stored) = self.stored(entry)?;

        if !entry.encrypted && !entry.compressed {
            return Ok(stored);
        }

        let payload = if entry.encrypted {
            Bytes::from(decrypt_copy(origin, entry, &stored, decrypt)?)
        } else {
            stored
        };

        if entry.compressed {
            let mut out = Vec::new();
            out.try_reserve_exact(entry.size as usize)
                .map_err(|err| ResourceError::OutOfMemory {
                    reason: format!("{} bytes for {:#018x}: {err}", entry.size, entry.hash),
                })?;
            out.resize(entry.size as usize, 0);
            decompress(origin, entry, &payload, &mut out)?;
            Ok(Bytes::from(out))
        } else {
            Ok(payload)
        }
    }

    /// Decode an entry's payload into `buf`, returning the number of bytes written.
    pub fn read_into(
        &self,
        entry: &ArchiveEntry,
        buf: &mut [u8],
        decrypt: Option<&DecryptFn>,
    ) -> ResourceResult<usize> {
        let size = entry.size as usize;
        if buf.len() < size {
            return Err(ResourceError::OutBufferTooSmall {
                needed: size,
                available: buf.len(),
            });
        }

        let (origin, stored) = self.stored(entry)?;
        let out = &mut buf[..size];

        if entry.encrypted {
            let plain = decrypt_copy(origin, entry, &stored, decrypt)?;
            if entry.compressed {
                decompress(origin, entry, &plain, out)?;
            } else {
                out.copy_from_slice(&plain);
            }
        } else if entry.compressed {
            decompress(origin, entry, &stored, out)?;
        } else {
            out.copy_from_slice(&stored);
        }

        Ok(size)
    }

    /// Stored bytes of an entry, bounds-checked against its archive.
    fn stored(&self, entry: &ArchiveEntry) -> ResourceResult<(&str, Bytes)> {
        let archive = self
            .archives
            .get(entry.archive as usize)
            .ok_or_else(|| ResourceError::hash_not_found(entry.hash))?;

        let start = entry.offset as usize;
        let end = start.saturating_add(entry.stored_size as usize);
        if end > archive.data.len() {
            return Err(ResourceError::InvalidFormat {
                origin: archive.origin.clone(),
                reason: format!("entry {:#018x} exceeds data region", entry.hash),
            });
        }

        Ok((archive.origin.as_str(), archive.data.slice(start..end)))
    }

    /// Total number of entries across all archives, duplicates included.
    pub fn len(&self) -> usize {
        self.archives.iter().map(|a| a.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn archive_count(&self) -> usize {
        self.archives.len()
    }

    /// Where each archive was mounted from, in mount order.
    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.archives.iter().map(|a| a.origin.as_str())
    }

    /// Every entry of every archive, in mount order then hash order.
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.archives.iter().flat_map(|a| a.entries.iter())
    }
}

impl std::fmt::Debug for ArchiveIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveIndex")
            .field("archives", &self.origins().collect::<Vec<_>>())
            .field("entries", &self.len())
            .finish()
    }
}

fn decrypt_copy(
    origin: &str,
    entry: &ArchiveEntry,
    stored: &[u8],
    decrypt: Option<&DecryptFn>,
) -> ResourceResult<Vec<u8>> {
    let Some(decrypt) = decrypt else {
        return Err(ResourceError::NotSupported {
            reason: format!(
                "entry {:#018x} in '{}' is encrypted and no decrypt hook is installed",
                entry.hash, origin
            ),
        });
    };

    let mut buf = stored.to_vec();
    decrypt(&mut buf)?;
    Ok(buf)
}

fn decompress(origin: &str, entry: &ArchiveEntry, input: &[u8], out: &mut [u8]) -> ResourceResult<()> {
    let written = lz4_flex::block::decompress_into(input, out).map_err(|err| {
        if let DecompressError::OutputTooSmall { expected, actual } = err {
            ResourceError::OutBufferTooSmall {
                needed: expected,
                available: actual,
            }
        } else {
            ResourceError::InvalidFormat {
                origin: origin.to_string(),
                reason: format!("entry {:#018x}: {err}", entry.hash),
            }
        }
    })?;

    if written != out.len() {
        return Err(ResourceError::InvalidFormat {
            origin: origin.to_string(),
            reason: format!(
                "entry {:#018x} decompressed to {} bytes, expected {}",
                entry.hash,
                written,
                out.len()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xor(buf: &mut [u8]) -> ResourceResult<()> {
        buf.iter_mut().for_each(|b| *b ^= 0x5a);
        Ok(())
    }

    fn archive(entries: &[(u64, &[u8])], options: EntryOptions<'_>) -> Bytes {
        let mut builder = ArchiveBuilder::new();
        for (hash, bytes) in entries {
            builder.add(*hash, bytes, options).unwrap();
        }
        Bytes::from(builder.to_bytes())
    }

    #[test]
    fn test_lookup_miss() {
        let index = ArchiveIndex::from_memory([archive(&[(1, &b"one"[..])], EntryOptions::default())]).unwrap();
        assert!(index.lookup(2).is_none());
        assert!(matches!(index.find(2), Err(ResourceError::NotFound { .. })));
        assert_eq!(index.find(1).unwrap().size, 3);
    }

    #[test]
    fn test_first_archive_wins() {
        let a = archive(&[(7, &b"from a"[..])], EntryOptions::default());
        let b = archive(&[(7, &b"from b"[..]), (8, &b"only b"[..])], EntryOptions::default());
        let index = ArchiveIndex::from_memory([a, b]).unwrap();

        let entry = index.lookup(7).unwrap();
        assert_eq!(entry.archive, 0);
        assert_eq!(index.read(&entry, None).unwrap(), Bytes::from_static(b"from a"));

        let entry = index.lookup(8).unwrap();
        assert_eq!(entry.archive, 1);
        assert_eq!(index.len(), 3);
        assert_eq!(index.archive_count(), 2);
    }

    #[test]
    fn test_compressed_roundtrip() {
        let payload = vec![42u8; 4096];
        let options = EntryOptions {
            compress: true,
            ..Default::default()
        };
        let index = ArchiveIndex::from_memory([archive(&[(1, payload.as_slice())], options)]).unwrap();
        let entry = index.lookup(1).unwrap();
        assert!(entry.compressed);
        assert!(entry.stored_size < entry.size);
        assert_eq!(index.read(&entry, None).unwrap().as_ref(), payload.as_slice());
    }

    #[test]
    fn test_encrypted_compressed() {
        let payload = b"abcabcabcabcabcabcabcabcabcabcabcabcabcabc".repeat(8);
        let options = EntryOptions {
            compress: true,
            encrypt: Some(&xor),
        };
        let index = ArchiveIndex::from_memory([archive(&[(1, payload.as_slice())], options)]).unwrap();
        let entry = index.lookup(1).unwrap();
        assert!(entry.encrypted && entry.compressed);

        let bytes = index.read(&entry, Some(&xor)).unwrap();
        assert_eq!(bytes.as_ref(), payload.as_slice());

        assert!(matches!(
            index.read(&entry, None),
            Err(ResourceError::NotSupported { .. })
        ));
    }

    #[test]
    fn test_decrypt_called_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let counting = move |buf: &mut [u8]| {
            counter.fetch_add(1, Ordering::SeqCst);
            xor(buf)
        };
        let options = EntryOptions {
            compress: false,
            encrypt: Some(&xor),
        };
        let index = ArchiveIndex::from_memory([archive(&[(1, &b"secret"[..])], options)]).unwrap();
        let entry = index.lookup(1).unwrap();

        let bytes = index.read(&entry, Some(&counting)).unwrap();
        assert_eq!(bytes.as_ref(), b"secret");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_into() {
        let index = ArchiveIndex::from_memory([archive(&[(1, &b"hello"[..])], EntryOptions::default())]).unwrap();
        let entry = index.lookup(1).unwrap();

        let mut small = [0u8; 3];
        assert!(matches!(
            index.read_into(&entry, &mut small, None),
            Err(ResourceError::OutBufferTooSmall {
                needed: 5,
                available: 3
            })
        ));

        let mut buf = [0u8; 8];
        assert_eq!(index.read_into(&entry, &mut buf, None).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn test_open_missing_file() {
        let result = ArchiveIndex::open(["/definitely/not/here.tsra"]);
        assert!(matches!(result, Err(ResourceError::Io { .. })));
    }

    #[test]
    fn test_empty() {
        let index = ArchiveIndex::empty();
        assert!(index.is_empty());
        assert!(index.lookup(0).is_none());
    }
}
