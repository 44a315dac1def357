//! String key-value cache with expiration, used to memoize per-user listings.
//!
//! Every operation is idempotent and best-effort: callers log cache errors and
//! carry on, since a stale or missing entry only costs a store round trip.

mod memory;

pub use memory::MemoryCache;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    /// Removing a missing key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Remove every key starting with `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

/// Prefix shared by every cache entry scoped to one user.
pub fn user_prefix(owner_id: &str) -> String {
    format!("user:{owner_id}:")
}

/// Key of a user's cached file listing.
pub fn user_files_key(owner_id: &str) -> String {
    format!("{}files", user_prefix(owner_id))
}

/// Drop everything cached for `owner_id`, logging rather than returning failures.
pub async fn invalidate_user(cache: &dyn Cache, owner_id: &str) {
    match cache.delete_prefix(&user_prefix(owner_id)).await {
        Ok(removed) => {
            tracing::trace!(owner_id = %owner_id, removed, "Invalidated user cache");
        }
        Err(e) => {
            tracing::warn!(owner_id = %owner_id, error = %e, "Failed to invalidate user cache");
        }
    }
}
