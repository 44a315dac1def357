use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Cache, CacheError};

/// More shards means less lock contention between unrelated users.
const NUM_SHARDS: usize = 16;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process cache: sharded maps behind `RwLock`s, expired lazily on access
/// and whenever a shard is scanned for prefix deletion.
pub struct MemoryCache {
    shards: Vec<RwLock<HashMap<String, Entry>>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, Entry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    fn poisoned() -> CacheError {
        CacheError::Backend("cache lock poisoned".to_string())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .filter_map(|s| s.read().ok())
            .map(|m| m.values().filter(|e| !e.is_expired(now)).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let shard = self.shard(key);
        {
            let map = shard.read().map_err(|_| Self::poisoned())?;
            match map.get(key) {
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: take the write lock and drop it unless it was refreshed meanwhile.
        let mut map = shard.write().map_err(|_| Self::poisoned())?;
        if map.get(key).is_some_and(|e| e.is_expired(now)) {
            map.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let mut map = self.shard(key).write().map_err(|_| Self::poisoned())?;
        map.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut map = self.shard(key).write().map_err(|_| Self::poisoned())?;
        map.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.write().map_err(|_| Self::poisoned())?;
            map.retain(|k, e| {
                if k.starts_with(prefix) {
                    if !e.is_expired(now) {
                        removed += 1;
                    }
                    false
                } else {
                    !e.is_expired(now)
                }
            });
        }
        Ok(removed)
    }
}
