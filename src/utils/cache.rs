//! Short-lived in-memory cache for inferred table schemas.
//!
//! Inference samples the remote table on every call. When a TTL is configured
//! the result is reused for that long, and every write made through this
//! process drops the entry for the written table so validation never runs
//! against a schema that predates our own mutation.
//!
//! Each table carries a generation that [`SchemaCache::invalidate`] bumps. A
//! caller reads it with [`SchemaCache::generation`] before sampling and hands
//! it back to [`SchemaCache::insert`]; a sample that raced a write is dropped.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::schema::SchemaInference;

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheResult<T> {
    /// Item was found and is valid
    Hit(T),

    /// Item was not found
    Miss,

    /// Item was found but has expired
    Expired,
}

#[derive(Debug, Clone)]
struct CachedSchema {
    cached_at: Instant,
    sample_size: usize,
    inference: SchemaInference,
}

/// Per-table schema cache
#[derive(Debug)]
pub struct SchemaCache {
    ttl: Duration,
    state: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CachedSchema>,
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn generation(&self, table: &str) -> u64 {
        self.generations.get(table).copied().unwrap_or(0)
    }
}

impl SchemaCache {
    /// Create a cache; a zero TTL disables caching entirely
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Check if caching is enabled
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Look up the schema inferred for `table` from a sample of `sample_size`
    pub fn get(&self, table: &str, sample_size: usize) -> CacheResult<SchemaInference> {
        if !self.is_enabled() {
            return CacheResult::Miss;
        }

        let Ok(mut state) = self.state.lock() else {
            return CacheResult::Miss;
        };

        let fresh = match state.entries.get(table) {
            None => return CacheResult::Miss,
            Some(cached) if cached.sample_size != sample_size => return CacheResult::Miss,
            Some(cached) if cached.cached_at.elapsed() >= self.ttl => None,
            Some(cached) => Some(cached.inference.clone()),
        };

        match fresh {
            Some(inference) => {
                tracing::debug!(table, "Schema cache HIT");
                CacheResult::Hit(inference)
            }
            None => {
                tracing::debug!(table, "Schema cache expired");
                state.entries.remove(table);
                CacheResult::Expired
            }
        }
    }

    /// Current generation of `table`; read it before sampling
    pub fn generation(&self, table: &str) -> u64 {
        self.state.lock().map(|s| s.generation(table)).unwrap_or(0)
    }

    /// Store a schema sampled at `generation`.
    ///
    /// Returns `false` and stores nothing when the table was invalidated
    /// since that generation was read.
    pub fn insert(
        &self,
        table: &str,
        sample_size: usize,
        generation: u64,
        inference: SchemaInference,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if state.generation(table) != generation {
            tracing::debug!(table, "Discarding schema sampled before a write");
            return false;
        }
        state.entries.insert(
            table.to_string(),
            CachedSchema {
                cached_at: Instant::now(),
                sample_size,
                inference,
            },
        );
        true
    }

    /// Drop the entry for a table after it was mutated
    pub fn invalidate(&self, table: &str) {
        if let Ok(mut state) = self.state.lock() {
            *state.generations.entry(table.to_string()).or_insert(0) += 1;
            if state.entries.remove(table).is_some() {
                tracing::debug!(table, "Schema cache invalidated");
            }
        }
    }

    /// Number of cached tables
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Check if the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_cache_never_hits() {
        let cache = SchemaCache::disabled();
        cache.insert("orders", 20, 0, SchemaInference::Empty);
        assert_eq!(cache.get("orders", 20), CacheResult::Miss);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hit_and_invalidate() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        cache.insert("orders", 20, 0, SchemaInference::Empty);
        assert_eq!(cache.get("orders", 20), CacheResult::Hit(SchemaInference::Empty));

        cache.invalidate("orders");
        assert_eq!(cache.get("orders", 20), CacheResult::Miss);
    }

    #[test]
    fn test_sample_size_mismatch_is_miss() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        cache.insert("orders", 10, 0, SchemaInference::Empty);
        assert_eq!(cache.get("orders", 20), CacheResult::Miss);
    }

    #[test]
    fn test_expiry() {
        let cache = SchemaCache::new(Duration::from_millis(1));
        cache.insert("orders", 20, 0, SchemaInference::Empty);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("orders", 20), CacheResult::Expired);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_after_invalidate_is_dropped() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        let before = cache.generation("orders");

        // a write lands while the sample is being read
        cache.invalidate("orders");

        assert!(!cache.insert("orders", 20, before, SchemaInference::Empty));
        assert_eq!(cache.get("orders", 20), CacheResult::Miss);

        let current = cache.generation("orders");
        assert_eq!(current, before + 1);
        assert!(cache.insert("orders", 20, current, SchemaInference::Empty));
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_generations_are_per_table() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        let orders = cache.generation("orders");
        cache.invalidate("customers");
        assert!(cache.insert("orders", 20, orders, SchemaInference::Empty));
    }
}
