//! Resource identity: path hashing and extension parsing.

use crate::error::{ResourceError, ResourceResult};

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Hash a resource path into its 64-bit name hash (FNV-1a).
///
/// Paths must already be normalized; `"a/b.tex"` and `"a\\b.tex"` hash differently.
pub const fn hash_path(path: &str) -> u64 {
    hash_bytes(path.as_bytes())
}

/// FNV-1a over arbitrary bytes.
pub const fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// The extension of a resource path, without the dot.
///
/// Only the last `/`-separated segment is considered, so `"dir.v2/file"` has none.
pub fn extension_of(path: &str) -> ResourceResult<&str> {
    if path.is_empty() {
        return Err(ResourceError::InvalidPath {
            path: path.to_string(),
        });
    }

    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rfind('.') {
        Some(dot) if dot + 1 < file_name.len() => Ok(&file_name[dot + 1..]),
        _ => Err(ResourceError::MissingExtension {
            path: path.to_string(),
        }),
    }
}
