//! Gateway counters, exposed as JSON at `GET /metrics`.

use crate::domain::error::codes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cipher gateway metrics
#[derive(Default)]
pub struct GatewayMetrics {
    // Gateway calls
    pub calls_total: AtomicU64,
    pub calls_success: AtomicU64,

    // Plaintext rejections by code family
    pub rejected_request: AtomicU64,
    pub rejected_auth: AtomicU64,
    pub rejected_rate_limit: AtomicU64,
    pub rejected_route: AtomicU64,
    pub rejected_internal: AtomicU64,

    // Dispatch
    pub fallbacks: AtomicU64,
    pub handler_faults: AtomicU64,
    pub missing_params: AtomicU64,

    // Key administration
    pub handshakes: AtomicU64,
    pub keys_revoked: AtomicU64,
    pub route_reloads: AtomicU64,

    // Latency tracking (simplified - no histograms)
    pub total_latency_ms: AtomicU64,
    pub request_count_for_latency: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a gateway call that produced an encrypted reply
    pub fn record_call(&self, latency_ms: u64) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        self.calls_success.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_ms);
    }

    /// Record a gateway call rejected with a plaintext `{code, msg}`
    pub fn record_rejection(&self, code: i32, latency_ms: u64) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        let counter = match code {
            codes::RATE_LIMITED => &self.rejected_rate_limit,
            codes::ROUTE_NOT_FOUND => &self.rejected_route,
            codes::BAD_REQUEST => &self.rejected_request,
            codes::INTERNAL_ERROR => &self.rejected_internal,
            _ => &self.rejected_auth,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_ms);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_fault(&self) {
        self.handler_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missing_param(&self) {
        self.missing_params.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake(&self) {
        self.handshakes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revoked(&self, count: usize) {
        self.keys_revoked.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_route_reload(&self) {
        self.route_reloads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency_ms: u64) {
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.request_count_for_latency.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count_for_latency.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "calls": {
                "total": self.calls_total.load(Ordering::Relaxed),
                "success": self.calls_success.load(Ordering::Relaxed),
            },
            "rejected": {
                "request": self.rejected_request.load(Ordering::Relaxed),
                "auth": self.rejected_auth.load(Ordering::Relaxed),
                "rate_limit": self.rejected_rate_limit.load(Ordering::Relaxed),
                "route": self.rejected_route.load(Ordering::Relaxed),
                "internal": self.rejected_internal.load(Ordering::Relaxed),
            },
            "dispatch": {
                "fallbacks": self.fallbacks.load(Ordering::Relaxed),
                "handler_faults": self.handler_faults.load(Ordering::Relaxed),
                "missing_params": self.missing_params.load(Ordering::Relaxed),
            },
            "keys": {
                "handshakes": self.handshakes.load(Ordering::Relaxed),
                "revoked": self.keys_revoked.load(Ordering::Relaxed),
                "route_reloads": self.route_reloads.load(Ordering::Relaxed),
            },
            "latency": {
                "average_ms": self.average_latency_ms(),
            }
        })
    }
}

/// Request timing helper
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<GatewayMetrics>,
}

impl RequestTimer {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    /// Finish a call. `rejected` carries the plaintext code, if any.
    pub fn finish(self, rejected: Option<i32>) {
        let latency_ms = self.start.elapsed().as_millis() as u64;
        match rejected {
            Some(code) => self.metrics.record_rejection(code, latency_ms),
            None => self.metrics.record_call(latency_ms),
        }
    }
}
