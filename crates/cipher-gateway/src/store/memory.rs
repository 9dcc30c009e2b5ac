//! In-process [`SharedCache`] backed by `DashMap`.
//!
//! Each operation runs under the shard lock of its key, which gives the
//! same per-key atomicity a networked cache provides. Expiry is evaluated
//! against the injected [`Clock`](crate::domain::Clock).

use super::{SharedCache, StoreError, StoreResult};
use crate::domain::clock::{SharedClock, SystemClock};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Bytes),
    Counter(i64),
    Set(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Unix seconds; the entry is gone once `now >= expire_at`
    expire_at: i64,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        now < self.expire_at
    }
}

/// TTL rounded up to whole seconds, at least one
fn ttl_secs(ttl: Duration) -> i64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1) as i64
}

/// In-memory shared cache
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, Entry>>,
    clock: SharedClock,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(SystemClock::shared())
    }
}

impl MemoryCache {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed = removed, "Purged expired cache entries");
        }
        removed
    }

    /// Number of stored entries, live or not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expire_at(&self, ttl: Duration) -> i64 {
        self.clock.now() + ttl_secs(ttl)
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let now = self.clock.now();
        // Release the read guard before any removal on the same shard
        let lookup = self
            .entries
            .get(key)
            .map(|entry| (entry.is_live(now), entry.value.clone()));
        let value = match lookup {
            Some((true, value)) => value,
            Some((false, _)) => {
                self.entries.remove_if(key, |_, e| !e.is_live(now));
                return Ok(None);
            }
            None => return Ok(None),
        };
        match value {
            Value::Bytes(bytes) => Ok(Some(bytes)),
            Value::Counter(n) => Ok(Some(Bytes::from(n.to_string()))),
            Value::Set(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<()> {
        let entry = Entry {
            value: Value::Bytes(value),
            expire_at: self.expire_at(ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<bool> {
        let now = self.clock.now();
        let entry = Entry {
            value: Value::Bytes(value),
            expire_at: self.expire_at(ttl),
        };
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(entry);
                    Ok(true)
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    async fn incr(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let now = self.clock.now();
        let fresh = Entry {
            value: Value::Counter(1),
            expire_at: self.expire_at(ttl),
        };
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if !occupied.get().is_live(now) {
                    occupied.insert(fresh);
                    return Ok(1);
                }
                match &mut occupied.get_mut().value {
                    Value::Counter(n) => {
                        *n += 1;
                        Ok(*n)
                    }
                    _ => Err(StoreError::WrongType(key.to_string())),
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(1)
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| entry.is_live(now))
            .unwrap_or(false))
    }

    async fn push_unique(&self, key: &str, member: &str, ttl: Duration) -> StoreResult<()> {
        let now = self.clock.now();
        let expire_at = self.expire_at(ttl);
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if !entry.is_live(now) {
                    entry.value = Value::Set(vec![member.to_string()]);
                    entry.expire_at = expire_at;
                    return Ok(());
                }
                match &mut entry.value {
                    Value::Set(members) => {
                        if !members.iter().any(|m| m == member) {
                            members.push(member.to_string());
                        }
                        entry.expire_at = expire_at;
                        Ok(())
                    }
                    _ => Err(StoreError::WrongType(key.to_string())),
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: Value::Set(vec![member.to_string()]),
                    expire_at,
                });
                Ok(())
            }
        }
    }

    async fn members(&self, key: &str) -> StoreResult<Vec<String>> {
        let now = self.clock.now();
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Set(members) => Ok(members.clone()),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn remove_members(&self, key: &str, members: &[String]) -> StoreResult<usize> {
        let now = self.clock.now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => match &mut entry.value {
                Value::Set(current) => {
                    let before = current.len();
                    current.retain(|m| !members.contains(m));
                    Ok(before - current.len())
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
            _ => Ok(0),
        }
    }
}

/// Background task purging expired entries
pub async fn cleanup_task(cache: MemoryCache, interval: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        cache.purge_expired();
    }
}
