//! Per-device signing secrets.
//!
//! The handshake hands each device a secret (`userSecret`) that keys the
//! HMAC over requests and responses. Devices without one fall back to a
//! configured test secret.

use crate::domain::clock::SharedClock;
use crate::domain::error::GatewayResult;
use crate::domain::types::fingerprint;
use crate::store::{keys, SharedStore};
use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct DeviceSecrets {
    store: SharedStore,
    clock: SharedClock,
    ttl: Duration,
    fallback: String,
}

impl DeviceSecrets {
    pub fn new(store: SharedStore, clock: SharedClock, ttl: Duration, fallback: String) -> Self {
        Self {
            store,
            clock,
            ttl,
            fallback,
        }
    }

    /// Cached secret for the device, creating one if absent.
    ///
    /// Concurrent handshakes for one device agree on a single secret.
    pub async fn get_or_create(&self, device_id: &str) -> GatewayResult<String> {
        let key = keys::device_secret(device_id);
        if let Some(existing) = self.cached(&key).await? {
            return Ok(existing);
        }

        let candidate = self.generate(device_id);
        if self
            .store
            .set_if_absent(&key, Bytes::from(candidate.clone()), self.ttl)
            .await?
        {
            info!(device = fingerprint(device_id), "Device secret created");
            return Ok(candidate);
        }

        // Lost the race; use whatever the winner stored
        Ok(self.cached(&key).await?.unwrap_or(candidate))
    }

    /// Secret used to verify request signatures and sign responses
    pub async fn signing_secret(&self, device_id: &str) -> GatewayResult<String> {
        match self.cached(&keys::device_secret(device_id)).await? {
            Some(secret) => Ok(secret),
            None => {
                debug!(
                    device = fingerprint(device_id),
                    "No device secret cached, using fallback secret"
                );
                Ok(self.fallback.clone())
            }
        }
    }

    async fn cached(&self, key: &str) -> GatewayResult<Option<String>> {
        Ok(self
            .store
            .get(key)
            .await?
            .and_then(|raw| String::from_utf8(raw.to_vec()).ok())
            .filter(|s| !s.is_empty()))
    }

    fn generate(&self, device_id: &str) -> String {
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let mut hasher = Sha256::new();
        hasher.update(device_id.as_bytes());
        hasher.update(self.clock.now().to_be_bytes());
        hasher.update(salt);
        hex::encode(hasher.finalize())
    }
}
