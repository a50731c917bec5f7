//! Byte sources: the loose-file overlay and the mounted archives.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::archive::{ArchiveIndex, DecryptFn};
use crate::error::{ResourceError, ResourceResult};

/// Reads resource paths as files under a base directory.
#[derive(Debug, Clone)]
pub struct LooseFiles {
    base_path: PathBuf,
}

impl LooseFiles {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a `/`-separated resource path against the base directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.base_path.clone(), |acc, segment| acc.join(segment))
    }

    /// Read a file. A missing file is `NotFound`, anything else is `Io`.
    pub fn read(&self, path: &str) -> ResourceResult<Bytes> {
        let full_path = self.resolve(path);
        std::fs::read(&full_path).map(Bytes::from).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ResourceError::NotFound {
                    path: path.to_string(),
                }
            } else {
                ResourceError::Io {
                    path: full_path,
                    source: e,
                }
            }
        })
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }
}

/// Everything a factory or preloader needs to turn a path into bytes.
pub(crate) struct ContentSources {
    archive: RwLock<Arc<ArchiveIndex>>,
    loose: Option<LooseFiles>,
    decrypt: Option<Arc<DecryptFn>>,
}

impl ContentSources {
    pub fn new(archive: ArchiveIndex, loose: Option<LooseFiles>, decrypt: Option<Arc<DecryptFn>>) -> Self {
        Self {
            archive: RwLock::new(Arc::new(archive)),
            loose,
            decrypt,
        }
    }

    pub fn archive(&self) -> Arc<ArchiveIndex> {
        self.archive.read().clone()
    }

    /// Swap in a new archive index, returning the old one.
    pub fn mount(&self, archive: ArchiveIndex) -> Arc<ArchiveIndex> {
        std::mem::replace(&mut *self.archive.write(), Arc::new(archive))
    }

    pub fn loose(&self) -> Option<&LooseFiles> {
        self.loose.as_ref()
    }

    /// Fetch the bytes for a path: loose overlay first, then the archives.
    pub fn fetch(&self, path: &str, hash: u64) -> ResourceResult<Bytes> {
        if let Some(loose) = &self.loose {
            match loose.read(path) {
                Err(ResourceError::NotFound { .. }) => {}
                other => return other,
            }
        }

        let archive = self.archive();
        let entry = archive.lookup(hash).ok_or_else(|| ResourceError::NotFound {
            path: path.to_string(),
        })?;
        archive.read(&entry, self.decrypt.as_deref())
    }
}
