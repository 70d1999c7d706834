//! TTL + LRU cache for routing decisions and lookups.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::persistence::unix_time;

const HOUR: u64 = 3600;

/// TTL strategy assigned to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    NoCache,
    /// The configured `default_ttl_secs`.
    Default,
    Medium,
    Long,
    Permanent,
}

impl CacheStrategy {
    pub fn ttl(&self, default: Duration) -> Duration {
        match self {
            CacheStrategy::NoCache => Duration::ZERO,
            CacheStrategy::Default => default,
            CacheStrategy::Medium => Duration::from_secs(30 * 60),
            CacheStrategy::Long => Duration::from_secs(2 * HOUR),
            CacheStrategy::Permanent => Duration::from_secs(365 * 24 * HOUR),
        }
    }
}

/// What a cached value describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    /// Tool name → chosen provider.
    Routing,
    /// Advertised tool list.
    ToolList,
    /// Provider capability lookups.
    Capabilities,
    /// Tool execution results. Never cached.
    ToolResult,
    /// Static server metadata.
    ServerInfo,
}

impl CacheCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Routing => "routing",
            CacheCategory::ToolList => "tool_list",
            CacheCategory::Capabilities => "capabilities",
            CacheCategory::ToolResult => "tool_result",
            CacheCategory::ServerInfo => "server_info",
        }
    }

    pub fn strategy(&self) -> CacheStrategy {
        match self {
            CacheCategory::Routing => CacheStrategy::Default,
            CacheCategory::ToolList => CacheStrategy::Medium,
            CacheCategory::Capabilities => CacheStrategy::Long,
            CacheCategory::ToolResult => CacheStrategy::NoCache,
            CacheCategory::ServerInfo => CacheStrategy::Permanent,
        }
    }

    pub fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.as_str(), identifier)
    }
}

/// A cached value with its bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    /// Insertion time, unix seconds.
    pub timestamp: f64,
    /// Lifetime in seconds.
    pub ttl: f64,
    pub access_count: u64,
    /// Last read or write, unix seconds.
    pub last_access: f64,
    #[serde(skip)]
    seq: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: f64) -> bool {
        now - self.timestamp > self.ttl
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    // access sequence → key, oldest first
    lru: BTreeMap<u64, String>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.seq);
        Some(entry)
    }

    fn sweep_expired(&mut self, now: f64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn evict_to(&mut self, max_size: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max_size {
            let Some((_, key)) = self.lru.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            evicted += 1;
        }
        self.evictions += evicted as u64;
        evicted
    }
}

/// Routing decision cache.
pub struct RoutingCache {
    inner: Mutex<Inner>,
    max_size: usize,
    default_ttl: Duration,
}

impl RoutingCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_size: config.max_size.max(1),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
        }
    }

    /// Fetch a live entry, refreshing its recency.
    pub fn get(&self, category: CacheCategory, identifier: &str) -> Option<Value> {
        let owned = category.key(identifier);
        let key = owned.as_str();
        let label = category.as_str();
        let now = unix_time();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                metrics::record_cache_lookup(label, false);
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            inner.remove(key);
            inner.misses += 1;
            metrics::record_cache_lookup(label, false);
            return None;
        }

        let seq = inner.bump();
        let entry = inner.entries.get_mut(key)?;
        let old_seq = entry.seq;
        entry.seq = seq;
        entry.access_count += 1;
        entry.last_access = now;
        let data = entry.data.clone();

        inner.lru.remove(&old_seq);
        inner.lru.insert(seq, key.to_string());
        inner.hits += 1;
        metrics::record_cache_lookup(label, true);
        Some(data)
    }

    /// Store a value under the category's strategy, or an explicit TTL.
    ///
    /// A zero TTL stores nothing and drops any existing entry.
    pub fn set(&self, category: CacheCategory, identifier: &str, data: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| category.strategy().ttl(self.default_ttl));
        let key = category.key(identifier);
        let mut inner = self.inner.lock();
        if ttl.is_zero() {
            inner.remove(&key);
            return;
        }

        let now = unix_time();
        inner.remove(&key);
        let seq = inner.bump();
        inner.lru.insert(seq, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                data,
                timestamp: now,
                ttl: ttl.as_secs_f64(),
                access_count: 0,
                last_access: now,
                seq,
            },
        );

        if inner.entries.len() * 5 > self.max_size * 4 {
            inner.sweep_expired(now);
        }
        let evicted = inner.evict_to(self.max_size);
        if evicted > 0 {
            metrics::record_cache_evictions(evicted);
        }
        metrics::record_cache_size(inner.entries.len());
    }

    /// Drop one entry. Returns whether it existed.
    pub fn invalidate(&self, category: CacheCategory, identifier: &str) -> bool {
        self.inner.lock().remove(&category.key(identifier)).is_some()
    }

    /// Drop every entry of a category.
    pub fn clear_category(&self, category: CacheCategory) -> usize {
        let prefix = format!("{}:", category.as_str());
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner.entries.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
        for key in &keys {
            inner.remove(key);
        }
        keys.len()
    }

    /// Remove every expired entry.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let removed = inner.sweep_expired(unix_time());
        metrics::record_cache_size(inner.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    /// Write every live entry to `path` as JSON.
    pub fn snapshot_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<usize> {
        let now = unix_time();
        let live: BTreeMap<String, CacheEntry> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|(_, e)| !e.is_expired(now))
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect()
        };

        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, &live)?;
        tracing::info!(entries = live.len(), path = %path.as_ref().display(), "Saved cache snapshot");
        Ok(live.len())
    }

    /// Load live entries from a snapshot. A missing file restores nothing.
    pub fn restore_from_file(&self, path: impl AsRef<Path>) -> std::io::Result<usize> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(0);
        }

        let reader = BufReader::new(File::open(path)?);
        let saved: HashMap<String, CacheEntry> = serde_json::from_reader(reader)?;

        let now = unix_time();
        let mut live: Vec<(String, CacheEntry)> = saved.into_iter().filter(|(_, e)| !e.is_expired(now)).collect();
        live.sort_by(|a, b| a.1.last_access.total_cmp(&b.1.last_access));

        let mut inner = self.inner.lock();
        let restored = live.len();
        for (key, mut entry) in live {
            inner.remove(&key);
            entry.seq = inner.bump();
            inner.lru.insert(entry.seq, key.clone());
            inner.entries.insert(key, entry);
        }
        inner.evict_to(self.max_size);
        metrics::record_cache_size(inner.entries.len());
        tracing::info!(entries = restored, path = %path.display(), "Restored cache snapshot");
        Ok(restored)
    }
}
