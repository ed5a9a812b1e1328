//! On-disk result cache for connection discovery records.
//!
//! A flat JSON map keyed by a SHA-256 digest over the canonical chain
//! serialization. Reads tolerate absent or corrupt files; writes go
//! through a temp file and an atomic rename so a concurrent reader never
//! sees a half-written document.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Digest of the canonical chain serialization, used as the cache key.
pub fn cache_key(chains_repr: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chains_repr.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Key-value store in a single JSON file.
#[derive(Debug, Clone)]
pub struct Cache {
    path: PathBuf,
}

impl Cache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load<V: DeserializeOwned>(&self) -> BTreeMap<String, V> {
        let Ok(data) = fs::read(&self.path) else {
            debug!("cache file not present: {}", self.path.display());
            return BTreeMap::new();
        };
        match serde_json::from_slice(&data) {
            Ok(map) => map,
            Err(e) => {
                warn!("discarding corrupt cache file {}: {}", self.path.display(), e);
                BTreeMap::new()
            }
        }
    }

    /// Look up one record; misses and unreadable files return `None`.
    pub fn read<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        self.load().remove(key)
    }

    /// Insert or replace one record atomically.
    pub fn write<V: Serialize>(&self, key: &str, value: &V) -> Result<()> {
        let mut map: BTreeMap<String, serde_json::Value> = self.load();
        map.insert(key.to_string(), serde_json::to_value(value).map_err(io_like)?);

        let payload = serde_json::to_vec_pretty(&map).map_err(io_like)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;
        debug!("cache entry written: {}", key);
        Ok(())
    }
}

fn io_like(e: serde_json::Error) -> crate::error::Error {
    crate::error::Error::General(format!("cache serialization error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_stability() {
        let a = cache_key("telnet://admin@10.0.0.1:23");
        let b = cache_key("telnet://admin@10.0.0.1:23");
        assert_eq!(a, b);
        assert_ne!(a, cache_key("telnet://admin@10.0.0.2:23"));
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("test.cache"));

        cache.write("k1", &vec!["a".to_string(), "b".to_string()]).unwrap();
        cache.write("k2", &vec!["c".to_string()]).unwrap();

        let v1: Option<Vec<String>> = cache.read("k1");
        assert_eq!(v1.unwrap(), vec!["a", "b"]);
        let v2: Option<Vec<String>> = cache.read("k2");
        assert_eq!(v2.unwrap(), vec!["c"]);
        let missing: Option<Vec<String>> = cache.read("k3");
        assert!(missing.is_none());
    }

    #[test]
    fn test_corrupt_file_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.cache");
        fs::write(&path, b"not json at all").unwrap();

        let cache = Cache::new(&path);
        let value: Option<Vec<String>> = cache.read("k");
        assert!(value.is_none());

        // A write recovers the file.
        cache.write("k", &vec!["x".to_string()]).unwrap();
        let value: Option<Vec<String>> = cache.read("k");
        assert!(value.is_some());
    }

    #[test]
    fn test_overwrite_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("test.cache"));
        cache.write("k", &vec!["old".to_string()]).unwrap();
        cache.write("k", &vec!["new".to_string()]).unwrap();
        let value: Option<Vec<String>> = cache.read("k");
        assert_eq!(value.unwrap(), vec!["new"]);
    }
}
