//! Best-effort status cache. A miss only costs a controller round trip.

use crate::error::{HubError, Result};
use crate::fsutil;
use crate::ops::monitor::ServerStatusRecord;
use crate::ops::Scope;
use dashmap::DashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

pub trait CacheStore: Send + Sync {
    /// Records stored for `scope`, if younger than the TTL.
    fn get(&self, scope: &Scope) -> Option<Vec<ServerStatusRecord>>;
    fn put(&self, scope: &Scope, records: &[ServerStatusRecord]) -> Result<()>;
    fn invalidate(&self, scope: &Scope);
}

/// One JSON file per scope; the file's mtime is the TTL clock.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
    ttl: Duration,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn path_for(&self, scope: &Scope) -> PathBuf {
        self.dir
            .join(format!("cron_status_{}.json", scope.cache_key()))
    }

    /// Age of the cache file. An mtime in the future counts as fresh.
    fn age(path: &Path) -> Option<Duration> {
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }
}

impl CacheStore for FileCacheStore {
    fn get(&self, scope: &Scope) -> Option<Vec<ServerStatusRecord>> {
        let path = self.path_for(scope);
        let age = Self::age(&path)?;
        if age >= self.ttl {
            debug!("Status cache for '{}' expired ({:?} old)", scope, age);
            return None;
        }
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(records) => {
                debug!("Status cache hit for '{}'", scope);
                Some(records)
            }
            Err(e) => {
                debug!("Ignoring unreadable cache {}: {}", path.display(), e);
                None
            }
        }
    }

    fn put(&self, scope: &Scope, records: &[ServerStatusRecord]) -> Result<()> {
        let path = self.path_for(scope);
        fs::create_dir_all(&self.dir).map_err(|e| HubError::persist(&self.dir, e))?;

        let json = serde_json::to_string(records).map_err(|e| HubError::persist(&path, e.into()))?;
        let _lock = fsutil::lock_exclusive(&path).map_err(|e| HubError::persist(&path, e))?;
        fsutil::write_atomic(&path, json.as_bytes()).map_err(|e| HubError::persist(&path, e))
    }

    fn invalidate(&self, scope: &Scope) {
        let path = self.path_for(scope);
        match fs::remove_file(&path) {
            Ok(()) => debug!("Invalidated status cache for '{}'", scope),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!("Could not remove {}: {}", path.display(), e),
        }
    }
}

/// Process-local cache, for tests and single-process deployments.
#[derive(Debug)]
pub struct MemoryCacheStore {
    ttl: Duration,
    entries: DashMap<String, (Instant, Vec<ServerStatusRecord>)>,
}

impl MemoryCacheStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, scope: &Scope) -> Option<Vec<ServerStatusRecord>> {
        let entry = self.entries.get(scope.cache_key())?;
        let (stored_at, records) = entry.value();
        if stored_at.elapsed() < self.ttl {
            Some(records.clone())
        } else {
            None
        }
    }

    fn put(&self, scope: &Scope, records: &[ServerStatusRecord]) -> Result<()> {
        self.entries.insert(
            scope.cache_key().to_string(),
            (Instant::now(), records.to_vec()),
        );
        Ok(())
    }

    fn invalidate(&self, scope: &Scope) {
        self.entries.remove(scope.cache_key());
    }
}
