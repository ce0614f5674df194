//! In-process TTL cache with glob-pattern invalidation.
//!
//! Backs the cache-first read path of the license CRUD layer and the
//! invalidation contract of the sync pipeline. Values live only in
//! process memory; nothing survives a restart. Key conventions:
//!
//! - `license:{id}` — single entity
//! - `licenses:{serialized-filters}` — one list/query variation
//! - `licenses:stats` — aggregate dashboard statistics
//!
//! A targeted mutation invalidates its entity key plus all list and
//! aggregate keys; a bulk mutation (a sync run) clears everything under
//! `license*`. Writes to the underlying store always happen before
//! invalidation, so a stale read is bounded by that window.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Key helpers and TTL policy
// ---------------------------------------------------------------------------

/// Aggregate statistics key.
pub const STATS_KEY: &str = "licenses:stats";

/// Pattern covering every license-related key (entities, lists, stats).
pub const ALL_LICENSE_KEYS: &str = "license*";

/// TTL for single entities and filtered lists.
pub const ENTITY_TTL: Duration = Duration::from_secs(5 * 60);

/// TTL for aggregate statistics — more expensive to recompute and more
/// tolerant of staleness.
pub const STATS_TTL: Duration = Duration::from_secs(30 * 60);

/// Cache key for one license by id.
pub fn license_key(id: i64) -> String {
    format!("license:{id}")
}

/// Cache key for a filtered list. Any filter variation is a distinct key.
pub fn list_key(serialized_filters: &str) -> String {
    format!("licenses:{serialized_filters}")
}

// ---------------------------------------------------------------------------
// Entry and stats
// ---------------------------------------------------------------------------

struct CacheEntry {
    value: Value,
    inserted_at: tokio::time::Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// Cache hit/miss statistics.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub size: usize,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// TTL key/value cache. Shared as `Arc<TtlCache>` across the engine and
/// the HTTP layer; the inner `RwLock` covers the multi-task axum runtime.
pub struct TtlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TtlCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Fetch a value. An entry past its TTL counts as a miss and is
    /// evicted on the spot.
    pub async fn get(&self, key: &str) -> Option<Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {} // expired, evict below
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired()) {
            entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value with a TTL, replacing any existing entry.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: tokio::time::Instant::now(),
                ttl,
            },
        );
    }

    /// Remove one key. Returns whether it was present.
    pub async fn del(&self, key: &str) -> bool {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove every key matching a glob-like pattern (`*` wildcard).
    /// Returns the number of keys removed.
    pub async fn clear_pattern(&self, pattern: &str) -> usize {
        let mut entries = self.entries.write().await;
        let matching: Vec<String> = entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        for key in &matching {
            entries.remove(key);
        }
        self.deletes.fetch_add(matching.len() as u64, Ordering::Relaxed);
        matching.len()
    }

    /// Cache-first read-through: return the cached value, or run the
    /// producer and cache its result.
    ///
    /// Concurrent callers missing on the same key may each run the
    /// producer — an accepted staleness/cost tradeoff; the last writer
    /// wins and both see consistent data.
    pub async fn remember<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = producer().await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    /// Current statistics.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            size: self.entries.read().await.len(),
        }
    }

    /// Drop everything, including statistics. Test hook.
    pub async fn reset(&self) {
        self.entries.write().await.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
    }
}

/// Match a key against a glob pattern where `*` matches any (possibly
/// empty) substring. Patterns here are operator-supplied constants, so a
/// simple segment scan beats pulling in a glob engine.
fn glob_match(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }
    let segments: Vec<&str> = pattern.split('*').collect();
    let mut rest = key;

    // First segment is anchored at the start.
    let first = segments[0];
    if !rest.starts_with(first) {
        return false;
    }
    rest = &rest[first.len()..];

    // Middle segments must appear in order.
    for segment in &segments[1..segments.len() - 1] {
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(pos) => rest = &rest[pos + segment.len()..],
            None => return false,
        }
    }

    // Last segment is anchored at the end.
    let last = segments[segments.len() - 1];
    last.is_empty() || rest.ends_with(last)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
