//! Shared cache port.
//!
//! All cross-request state (session keys, device indexes, nonces, rate
//! counters, device secrets) lives behind [`SharedCache`]. Implementations
//! must make every operation atomic for its key: the nonce check is a
//! conditional set and the rate counter an increment-with-TTL, never a
//! read followed by a write.

pub mod memory;

pub use memory::{cleanup_task, MemoryCache};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or failed
    #[error("backend error: {0}")]
    Backend(String),
    /// Operation against a key holding another kind of value
    #[error("wrong value type for key {0}")]
    WrongType(String),
    /// Stored bytes did not decode
    #[error("corrupt value for key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key namespaces
pub mod keys {
    pub fn session_key(kid: &str) -> String {
        format!("session_key:{}", kid)
    }

    pub fn device_keys(device: &str) -> String {
        format!("device_keys:{}", device)
    }

    pub fn nonce(device: &str, nonce: &str) -> String {
        format!("nonce:{}:{}", device, nonce)
    }

    pub fn rate_limit(device: &str, method: &str) -> String {
        format!("rate_limit:{}:{}", device, method)
    }

    pub fn device_secret(device: &str) -> String {
        format!("secret:{}", device)
    }
}

/// Redis-like shared cache with per-key TTLs.
///
/// Expired entries are invisible to every operation.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<()>;

    /// Set only if no live entry exists. Returns true if this call stored the value.
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<bool>;

    /// Atomically increment a counter, creating it at 1 with `ttl` if absent.
    ///
    /// The TTL is not extended by later increments, so the window is fixed
    /// from the first hit.
    async fn incr(&self, key: &str, ttl: Duration) -> StoreResult<i64>;

    /// Delete a key. Returns true iff a live entry was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Append `member` to an ordered set (no duplicates) and refresh its TTL.
    async fn push_unique(&self, key: &str, member: &str, ttl: Duration) -> StoreResult<()>;

    /// Members of an ordered set in insertion order; empty if absent.
    async fn members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Remove `members` from an ordered set, keeping its TTL. Returns how many were present.
    async fn remove_members(&self, key: &str, members: &[String]) -> StoreResult<usize>;
}

/// Shared cache handle
pub type SharedStore = Arc<dyn SharedCache>;

/// JSON helpers over any [`SharedCache`]
#[async_trait]
pub trait SharedCacheExt: SharedCache {
    async fn get_json<T>(&self, key: &str) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get(key).await? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, key: &str, value: &T, ttl: Duration) -> StoreResult<()>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_vec(value).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.set(key, Bytes::from(raw), ttl).await
    }
}

impl<C: SharedCache + ?Sized> SharedCacheExt for C {}
