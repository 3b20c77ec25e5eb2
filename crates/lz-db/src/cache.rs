//! File cache for query results.
//!
//! Each result lives at `<root>/<shop_id>/queries/<name>_<key>.json`, where
//! `key` is the first 16 hex digits of a SHA-256 over the normalized SQL and
//! the sorted parameters. Files hold a [`QueryResult`] as pretty JSON.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use lz_core::{ValidationError, validate_path_segment};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::DbError;
use crate::query::{QueryKey, QueryResult};

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode cache entry {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    InvalidKey(#[from] ValidationError),
}

/// Directory-backed query cache.
#[derive(Debug, Clone)]
pub struct QueryCache {
    root: PathBuf,
}

/// What is cached for one shop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStatus {
    pub entries: usize,
    pub bytes: u64,
}

impl QueryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one shop; the id must be a single path segment.
    fn shop_dir(&self, shop_id: &str) -> Result<PathBuf, CacheError> {
        validate_path_segment("shop ID", shop_id)?;
        Ok(self.root.join(shop_id))
    }

    /// Path of the cache file for `key`.
    pub fn path_for(&self, key: &QueryKey) -> Result<PathBuf, CacheError> {
        let file_name = format!("{}_{}.json", key.name, &digest(key)[..16]);
        validate_path_segment("query name", &file_name)?;
        Ok(self.shop_dir(&key.shop_id)?.join("queries").join(file_name))
    }

    /// Loads a cached result; `None` on a miss.
    ///
    /// A file that cannot be decoded is reported and treated as a miss.
    pub fn load<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<Option<QueryResult<T>>, CacheError> {
        let path = self.path_for(key)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(result) => Ok(Some(result)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable cache entry");
                Ok(None)
            }
        }
    }

    /// Writes a result, replacing any existing entry.
    pub fn store<T: Serialize>(&self, key: &QueryKey, result: &QueryResult<T>) -> Result<PathBuf, CacheError> {
        let path = self.path_for(key)?;
        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        // Truncate only once the lock is held.
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;
        file.lock_exclusive().map_err(io_err)?;
        file.set_len(0).map_err(io_err)?;
        let mut writer = BufWriter::new(&file);
        serde_json::to_writer_pretty(&mut writer, result).map_err(|source| CacheError::Encode {
            path: path.clone(),
            source,
        })?;
        // The lock is released when the file is closed.
        writer.flush().map_err(io_err)?;

        tracing::debug!(path = %path.display(), rows = result.data.len(), "stored query result");
        Ok(path)
    }

    /// Removes every cached result of a shop. Returns whether anything existed.
    pub fn clear(&self, shop_id: &str) -> Result<bool, CacheError> {
        let dir = self.shop_dir(shop_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path: dir, source }),
        }
    }

    /// Counts the cached results of a shop.
    pub fn status(&self, shop_id: &str) -> Result<CacheStatus, CacheError> {
        let dir = self.shop_dir(shop_id)?.join("queries");
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CacheStatus::default());
            }
            Err(source) => return Err(CacheError::Io { path: dir, source }),
        };

        let mut status = CacheStatus::default();
        for entry in entries {
            let entry = entry.map_err(|source| CacheError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let meta = entry.metadata().map_err(|source| CacheError::Io { path, source })?;
                status.entries += 1;
                status.bytes += meta.len();
            }
        }
        Ok(status)
    }
}

/// Returns the cached result for `key`, or runs `fetch` and caches it.
///
/// With `use_cache` off the cache is neither read nor written. A failed
/// write is logged; the fetched rows are still returned.
pub fn cached_fetch<T, F>(
    cache: &QueryCache,
    use_cache: bool,
    key: &QueryKey,
    fetch: F,
) -> Result<QueryResult<T>, CacheError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<QueryResult<T>, DbError>,
{
    if use_cache {
        if let Some(hit) = cache.load(key)? {
            tracing::info!(
                query = %key.name,
                rows = hit.data.len(),
                executed = %hit.metadata.execution_time,
                "using cached query result"
            );
            return Ok(hit);
        }
    }

    let result = fetch()?;
    if use_cache {
        if let Err(err) = cache.store(key, &result) {
            tracing::warn!(query = %key.name, error = %err, "failed to cache query result");
        }
    }
    Ok(result)
}

/// Full hex SHA-256 of the normalized SQL and the sorted parameters.
fn digest(key: &QueryKey) -> String {
    let normalized = key.sql.split_whitespace().collect::<Vec<_>>().join(" ");
    // String maps always encode.
    let params = serde_json::to_string(&key.params).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"|");
    hasher.update(params.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;
    use std::collections::BTreeMap;

    use crate::query::QueryMetadata;

    fn key(sql: &str, shop: &str) -> QueryKey {
        QueryKey {
            name: "leitzonen_report".to_string(),
            shop_id: shop.to_string(),
            sql: sql.to_string(),
            params: BTreeMap::from([("shop_id".to_string(), shop.to_string())]),
        }
    }

    fn result(rows: Vec<String>) -> QueryResult<String> {
        QueryResult {
            metadata: QueryMetadata {
                query_name: "leitzonen_report".to_string(),
                shop_id: "shop".to_string(),
                execution_time: "2025-03-01T00:00:00Z".to_string(),
                duration_seconds: 0.25,
                row_count: rows.len(),
            },
            data: rows,
        }
    }

    #[test]
    fn digest_ignores_whitespace_layout() {
        assert_eq!(
            digest(&key("SELECT  1\n FROM t", "shop")),
            digest(&key("SELECT 1 FROM t", "shop"))
        );
        assert_ne!(
            digest(&key("SELECT 1 FROM t", "shop")),
            digest(&key("SELECT 2 FROM t", "shop"))
        );
    }

    #[test]
    fn path_layout() {
        let cache = QueryCache::new("/tmp/lz-cache");
        let path = cache.path_for(&key("SELECT 1", "shop")).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(path.starts_with("/tmp/lz-cache/shop/queries"));
        assert!(name.starts_with("leitzonen_report_"));
        assert_eq!(name.len(), "leitzonen_report_".len() + 16 + ".json".len());
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryCache::new(dir.path());
        let k = key("SELECT 1", "shop");

        assert!(cache.load::<String>(&k).unwrap().is_none());
        cache.store(&k, &result(vec!["a".to_string()])).unwrap();
        let loaded = cache.load::<String>(&k).unwrap().unwrap();
        assert_eq!(loaded, result(vec!["a".to_string()]));

        let rows = ["b", "c", "d"].map(str::to_string).to_vec();
        cache.store(&k, &result(rows)).unwrap();
        cache.store(&k, &result(vec!["e".to_string()])).unwrap();
        assert_eq!(cache.load::<String>(&k).unwrap().unwrap().data, vec!["e"]);
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryCache::new(dir.path());
        let k = key("SELECT 1", "shop");
        let path = cache.path_for(&k).unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        assert!(cache.load::<String>(&k).unwrap().is_none());
    }

    #[test]
    fn cached_fetch_runs_query_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryCache::new(dir.path());
        let k = key("SELECT 1", "shop");
        let calls = Cell::new(0);
        let fetch = || {
            calls.set(calls.get() + 1);
            Ok(result(vec!["row".to_string()]))
        };

        cached_fetch(&cache, true, &k, fetch).unwrap();
        let second = cached_fetch(&cache, true, &k, fetch).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(second.data, vec!["row"]);

        cached_fetch(&cache, false, &k, fetch).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn clear_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryCache::new(dir.path());
        assert_eq!(cache.status("shop").unwrap(), CacheStatus::default());
        assert!(!cache.clear("shop").unwrap());

        cache.store(&key("SELECT 1", "shop"), &result(vec![])).unwrap();
        cache.store(&key("SELECT 2", "shop"), &result(vec![])).unwrap();
        let status = cache.status("shop").unwrap();
        assert_eq!(status.entries, 2);
        assert!(status.bytes > 0);

        assert!(cache.clear("shop").unwrap());
        assert_eq!(cache.status("shop").unwrap().entries, 0);
    }

    #[test]
    fn shop_ids_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        let victim = dir.path().join("victim");
        fs::create_dir_all(&victim).unwrap();
        fs::write(victim.join("important.txt"), "keep").unwrap();
        let cache = QueryCache::new(&root);

        let absolute = victim.to_string_lossy().into_owned();
        for shop in ["../victim", absolute.as_str(), "", ".."] {
            assert!(
                matches!(cache.clear(shop), Err(CacheError::InvalidKey(_))),
                "clear({shop:?}) should be refused"
            );
            assert!(cache.status(shop).is_err());
            assert!(cache.store(&key("SELECT 1", shop), &result(vec![])).is_err());
        }
        assert!(victim.join("important.txt").exists());
    }
}
