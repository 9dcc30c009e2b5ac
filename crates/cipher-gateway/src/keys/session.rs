//! Session Key Store.
//!
//! Issues, looks up, lists and revokes per-device AES keys. Records live in
//! the shared cache under `session_key:{kid}`; `device_keys:{device}` is an
//! ordered index used only for listing and bulk revocation.

use crate::domain::clock::SharedClock;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::{fingerprint, IssuedKey, KeySummary, SessionKey, IV_LEN, KEY_LEN};
use crate::store::{keys, SharedCacheExt, SharedStore, StoreError};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Session key store over the shared cache
#[derive(Clone)]
pub struct SessionKeyStore {
    store: SharedStore,
    clock: SharedClock,
    ttl: Duration,
}

impl SessionKeyStore {
    pub fn new(store: SharedStore, clock: SharedClock, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generate and store a new key for `device_id`.
    pub async fn issue(
        &self,
        device_id: &str,
        user_id: Option<String>,
    ) -> GatewayResult<IssuedKey> {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);

        let now = self.clock.now();
        let ttl = self.ttl.as_secs();
        let record = SessionKey {
            kid: derive_kid(device_id, now),
            key,
            iv,
            device_id: device_id.to_string(),
            user_id,
            created_at: now,
            expire_at: now + ttl as i64,
        };

        self.store
            .set_json(&keys::session_key(&record.kid), &record, self.ttl)
            .await?;
        self.prune_index(device_id).await?;
        self.store
            .push_unique(&keys::device_keys(device_id), &record.kid, self.ttl)
            .await?;

        info!(
            device = fingerprint(device_id),
            kid = %record.kid,
            ttl = ttl,
            "Session key issued"
        );

        Ok(IssuedKey { record, ttl })
    }

    /// Resolve a kid. Absent or expired keys yield `KeyExpired`.
    ///
    /// Expiry is re-checked against `expireAt` even though the store has its
    /// own TTL; a stale record found here is deleted before reporting.
    pub async fn lookup(&self, kid: &str) -> GatewayResult<SessionKey> {
        let cache_key = keys::session_key(kid);
        let record: Option<SessionKey> = self.store.get_json(&cache_key).await?;

        match record {
            Some(record) if record.is_valid_at(self.clock.now()) => Ok(record),
            Some(_) => {
                debug!(kid = kid, "Session key past expireAt, deleting");
                self.store.delete(&cache_key).await?;
                Err(GatewayError::KeyExpired {
                    kid: kid.to_string(),
                })
            }
            None => Err(GatewayError::KeyExpired {
                kid: kid.to_string(),
            }),
        }
    }

    /// Keys indexed for a device. Unresolvable entries are skipped, and
    /// kids whose record is gone or expired are dropped from the index.
    pub async fn list_for_device(&self, device_id: &str) -> GatewayResult<Vec<KeySummary>> {
        let now = self.clock.now();
        let index_key = keys::device_keys(device_id);
        let kids = self.store.members(&index_key).await?;
        let mut list = Vec::with_capacity(kids.len());
        let mut dead = Vec::new();

        for kid in kids {
            match self.store.get_json::<SessionKey>(&keys::session_key(&kid)).await {
                Ok(Some(record)) if record.is_valid_at(now) => list.push(record.summary()),
                Ok(_) => dead.push(kid),
                Err(StoreError::Corrupt { reason, .. }) => {
                    warn!(kid = %kid, reason = %reason, "Skipping unreadable session key");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !dead.is_empty() {
            self.store.remove_members(&index_key, &dead).await?;
        }
        Ok(list)
    }

    /// Drop index entries whose session record no longer exists
    async fn prune_index(&self, device_id: &str) -> GatewayResult<usize> {
        let index_key = keys::device_keys(device_id);
        let mut dead = Vec::new();
        for kid in self.store.members(&index_key).await? {
            if self.store.get(&keys::session_key(&kid)).await?.is_none() {
                dead.push(kid);
            }
        }
        if dead.is_empty() {
            return Ok(0);
        }

        let pruned = self.store.remove_members(&index_key, &dead).await?;
        debug!(device = fingerprint(device_id), pruned = pruned, "Device key index pruned");
        Ok(pruned)
    }

    /// Delete every resolvable key of a device, then clear its index.
    ///
    /// Returns the number of records actually deleted.
    pub async fn revoke_all_for_device(&self, device_id: &str) -> GatewayResult<usize> {
        let index_key = keys::device_keys(device_id);
        let kids = self.store.members(&index_key).await?;

        let mut revoked = 0;
        for kid in &kids {
            if self.store.delete(&keys::session_key(kid)).await? {
                revoked += 1;
            }
        }
        self.store.delete(&index_key).await?;

        info!(
            device = fingerprint(device_id),
            indexed = kids.len(),
            revoked = revoked,
            "Device session keys revoked"
        );

        Ok(revoked)
    }
}

/// `k_{random}_{device/time fingerprint}`
fn derive_kid(device_id: &str, now: i64) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update(now.to_be_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("k_{}_{}", random, &digest[..8])
}
