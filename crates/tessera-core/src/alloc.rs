//! Hash collections used across tessera.
//!
//! - AHash-backed `HashMap`/`HashSet` for general keys
//! - `HashMap64`/`HashSet64` for keys that already are 64-bit hashes

use std::hash::{BuildHasherDefault, Hasher};

pub use ahash::{AHashMap as HashMap, AHashSet as HashSet, RandomState};

/// Hasher that passes a pre-computed 64-bit hash straight through.
///
/// Only `write_u64` is meaningful; other writes fold bytes in so the hasher
/// stays usable (if slower) for keys that are not plain `u64`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityHasher(u64);

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 = self.0.rotate_left(8) ^ u64::from(byte);
        }
    }

    fn write_u64(&mut self, value: u64) {
        self.0 = value;
    }
}

/// Map keyed by an already-hashed `u64` (resource name hashes).
pub type HashMap64<V> = std::collections::HashMap<u64, V, BuildHasherDefault<IdentityHasher>>;

/// Set of already-hashed `u64` values.
pub type HashSet64 = std::collections::HashSet<u64, BuildHasherDefault<IdentityHasher>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashmap_ahash() {
        let mut map = HashMap::new();
        map.insert("key", "value");
        assert_eq!(map.get("key"), Some(&"value"));
    }

    #[test]
    fn test_identity_hasher_passes_u64_through() {
        let mut hasher = IdentityHasher::default();
        hasher.write_u64(0xdead_beef_cafe_f00d);
        assert_eq!(hasher.finish(), 0xdead_beef_cafe_f00d);
    }

    #[test]
    fn test_hashmap64() {
        let mut map: HashMap64<&str> = HashMap64::default();
        map.insert(1, "a");
        map.insert(u64::MAX, "b");
        assert_eq!(map.get(&1), Some(&"a"));
        assert_eq!(map.get(&u64::MAX), Some(&"b"));

        let mut set = HashSet64::default();
        assert!(set.insert(7));
        assert!(!set.insert(7));
    }
}
