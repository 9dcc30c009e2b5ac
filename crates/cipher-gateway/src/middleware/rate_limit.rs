//! Per-(device, method) rate limiting.
//!
//! Fixed-window counters in the shared cache: the first call in a window
//! creates the counter with the window TTL, later calls increment it
//! atomically. The call that pushes the count past capacity is rejected.

use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::fingerprint;
use crate::store::{keys, SharedStore};
use std::time::Duration;
use tracing::warn;

/// Shared-cache rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
    window: Duration,
    capacity: u32,
}

impl RateLimiter {
    pub fn new(store: SharedStore, window: Duration, capacity: u32) -> Self {
        Self {
            store,
            window,
            capacity,
        }
    }

    /// Count one call; reject once the window holds more than `capacity`.
    pub async fn check(&self, device_id: &str, method: &str) -> GatewayResult<()> {
        let count = self
            .store
            .incr(&keys::rate_limit(device_id, method), self.window)
            .await?;

        if count > i64::from(self.capacity) {
            warn!(
                device = fingerprint(device_id),
                m = method,
                count = count,
                "Rate limit exceeded"
            );
            return Err(GatewayError::RateLimited { count });
        }
        Ok(())
    }
}
