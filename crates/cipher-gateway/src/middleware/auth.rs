//! Request Authenticator.
//!
//! Sequential, short-circuiting checks run before any decryption:
//!
//! 1. Timestamp present and within the allowed skew
//! 2. Nonce present and unused for this device (recorded on first use)
//! 3. Signature and device present, HMAC matches in constant time
//! 4. Rate limit for (device, method)
//!
//! Also hosts the bearer key check guarding management endpoints.

use super::rate_limit::RateLimiter;
use crate::crypto::{hmac_hex, request_signing_string};
use crate::domain::clock::SharedClock;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::{fingerprint, truncate, SecurityHeaders};
use crate::keys::DeviceSecrets;
use crate::store::{keys, SharedStore};
use axum::http::HeaderMap;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

/// Identity established by a successful authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub device_id: String,
    pub timestamp: i64,
    pub nonce: String,
}

/// Authenticator settings
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub timestamp_skew: Duration,
    pub nonce_ttl: Duration,
}

#[derive(Clone)]
pub struct RequestAuthenticator {
    store: SharedStore,
    secrets: DeviceSecrets,
    limiter: RateLimiter,
    clock: SharedClock,
    settings: AuthSettings,
}

impl RequestAuthenticator {
    pub fn new(
        store: SharedStore,
        secrets: DeviceSecrets,
        limiter: RateLimiter,
        clock: SharedClock,
        settings: AuthSettings,
    ) -> Self {
        Self {
            store,
            secrets,
            limiter,
            clock,
            settings,
        }
    }

    /// Authenticate one gateway call carrying `method` and `payload`.
    pub async fn authenticate(
        &self,
        method: &str,
        payload: &str,
        headers: &SecurityHeaders,
    ) -> GatewayResult<Authenticated> {
        let device = headers.device();

        // 1. Timestamp
        let now = self.clock.now();
        let raw_ts = headers.timestamp.as_deref();
        let ts = raw_ts.and_then(|t| t.parse::<i64>().ok());
        let skew = self.settings.timestamp_skew.as_secs();
        let ts = match ts {
            Some(ts) if now.abs_diff(ts) <= skew => ts,
            _ => {
                warn!(ts = ?raw_ts, now = now, "Timestamp skew");
                return Err(GatewayError::TimestampSkew { ts, now });
            }
        };

        // 2. Nonce, consumed atomically before the signature is checked
        let nonce = headers.nonce.as_deref().ok_or_else(|| {
            warn!(device = fingerprint(device), "Missing nonce");
            GatewayError::MissingNonce
        })?;
        let fresh = self
            .store
            .set_if_absent(
                &keys::nonce(device, nonce),
                Bytes::from_static(b"1"),
                self.settings.nonce_ttl,
            )
            .await?;
        if !fresh {
            warn!(
                device = fingerprint(device),
                nonce = truncate(nonce, 16),
                "Nonce replay"
            );
            return Err(GatewayError::ReplayDetected);
        }

        // 3. Signature
        let (Some(signature), Some(device_id)) =
            (headers.signature.as_deref(), headers.device_id.as_deref())
        else {
            warn!("Missing signature or device id");
            return Err(GatewayError::MissingSignature);
        };
        let secret = self.secrets.signing_secret(device_id).await?;
        let expected = hmac_hex(
            secret.as_bytes(),
            request_signing_string(raw_ts.unwrap_or_default(), nonce, method, payload).as_bytes(),
        );
        if !constant_time_compare(&expected, signature) {
            warn!(
                device = fingerprint(device_id),
                expected = fingerprint(&expected),
                received = fingerprint(signature),
                "Signature verification failed"
            );
            return Err(GatewayError::SignatureMismatch);
        }

        // 4. Rate limit
        self.limiter.check(device_id, method).await?;

        debug!(device = fingerprint(device_id), m = method, "Request authenticated");
        Ok(Authenticated {
            device_id: device_id.to_string(),
            timestamp: ts,
            nonce: nonce.to_string(),
        })
    }
}

/// Check the management bearer key.
///
/// Accepts `Authorization: Bearer <key>` or `X-API-Key: <key>`. No key
/// configured means management calls are open.
pub fn check_admin_key(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };

    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return constant_time_compare(token, expected);
        }
    }

    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return constant_time_compare(key, expected);
    }

    false
}

/// Constant-time string comparison to prevent timing attacks
///
/// SECURITY: This function takes the same amount of time regardless of how
/// many characters match. Uses `subtle::ConstantTimeEq`; a naive XOR loop
/// can still be optimized by the compiler.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    // Pad both to the longer length (prevents length oracle)
    let max_len = std::cmp::max(a.len(), b.len());

    // Different pad values ensure a mismatch if lengths differ
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];

    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);

    (lengths_equal & contents_equal).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::store::MemoryCache;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000;
    const FALLBACK: &str = "test_secret_key_123456";

    fn authenticator(capacity: u32) -> (RequestAuthenticator, Arc<ManualClock>, DeviceSecrets) {
        let clock = ManualClock::shared(NOW);
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let secrets = DeviceSecrets::new(
            cache.clone(),
            clock.clone(),
            Duration::from_secs(86_400),
            FALLBACK.into(),
        );
        let limiter = RateLimiter::new(cache.clone(), Duration::from_secs(60), capacity);
        let auth = RequestAuthenticator::new(
            cache,
            secrets.clone(),
            limiter,
            clock.clone(),
            AuthSettings {
                timestamp_skew: Duration::from_secs(300),
                nonce_ttl: Duration::from_secs(300),
            },
        );
        (auth, clock, secrets)
    }

    fn signed(secret: &str, ts: i64, nonce: &str) -> SecurityHeaders {
        let ts = ts.to_string();
        SecurityHeaders {
            signature: Some(hmac_hex(
                secret.as_bytes(),
                request_signing_string(&ts, nonce, "m1", "PAYLOAD").as_bytes(),
            )),
            timestamp: Some(ts),
            nonce: Some(nonce.into()),
            device_id: Some("dev1".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_valid_request() {
        let (auth, _, _) = authenticator(60);
        let ok = auth
            .authenticate("m1", "PAYLOAD", &signed(FALLBACK, NOW - 300, "n1"))
            .await
            .unwrap();
        assert_eq!(ok.device_id, "dev1");
        assert_eq!(ok.timestamp, NOW - 300);
    }

    #[tokio::test]
    async fn test_device_secret_used_once_issued() {
        let (auth, _, secrets) = authenticator(60);
        let secret = secrets.get_or_create("dev1").await.unwrap();
        assert!(matches!(
            auth.authenticate("m1", "PAYLOAD", &signed(FALLBACK, NOW, "n1")).await,
            Err(GatewayError::SignatureMismatch)
        ));
        assert!(auth
            .authenticate("m1", "PAYLOAD", &signed(&secret, NOW, "n2"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_timestamp_checks() {
        let (auth, _, _) = authenticator(60);
        let mut h = signed(FALLBACK, NOW + 301, "n1");
        assert!(matches!(
            auth.authenticate("m1", "PAYLOAD", &h).await,
            Err(GatewayError::TimestampSkew { .. })
        ));
        h.timestamp = None;
        assert_eq!(auth.authenticate("m1", "PAYLOAD", &h).await.unwrap_err().code(), 4002);
        h.timestamp = Some("soon".into());
        assert_eq!(auth.authenticate("m1", "PAYLOAD", &h).await.unwrap_err().code(), 4002);
    }

    #[tokio::test]
    async fn test_extreme_timestamps_rejected_without_overflow() {
        let (auth, _, _) = authenticator(60);
        for (ts, nonce) in [(i64::MIN, "n1"), (i64::MAX, "n2"), (i64::MIN + 1, "n3")] {
            let err = auth
                .authenticate("m1", "PAYLOAD", &signed(FALLBACK, ts, nonce))
                .await
                .unwrap_err();
            assert_eq!(err.code(), 4002, "ts {}", ts);
        }
    }

    #[tokio::test]
    async fn test_mutating_one_field_gives_distinct_code() {
        let (auth, _, _) = authenticator(60);

        let mut h = signed(FALLBACK, NOW, "n1");
        h.nonce = None;
        assert_eq!(auth.authenticate("m1", "PAYLOAD", &h).await.unwrap_err().code(), 400);

        let mut h = signed(FALLBACK, NOW, "n2");
        h.signature = Some("00".repeat(32));
        assert_eq!(auth.authenticate("m1", "PAYLOAD", &h).await.unwrap_err().code(), 4006);

        let mut h = signed(FALLBACK, NOW, "n3");
        h.signature = None;
        assert_eq!(auth.authenticate("m1", "PAYLOAD", &h).await.unwrap_err().code(), 400);

        // Signature covers the payload
        let h = signed(FALLBACK, NOW, "n4");
        assert_eq!(auth.authenticate("m1", "OTHER", &h).await.unwrap_err().code(), 4006);
    }

    #[tokio::test]
    async fn test_replay_rejected_until_ttl() {
        let (auth, clock, _) = authenticator(60);
        auth.authenticate("m1", "PAYLOAD", &signed(FALLBACK, NOW, "n1"))
            .await
            .unwrap();
        assert!(matches!(
            auth.authenticate("m1", "PAYLOAD", &signed(FALLBACK, NOW, "n1")).await,
            Err(GatewayError::ReplayDetected)
        ));

        clock.advance(300);
        assert!(auth
            .authenticate("m1", "PAYLOAD", &signed(FALLBACK, NOW + 300, "n1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_nonce_consumed_even_when_signature_fails() {
        let (auth, _, _) = authenticator(60);
        let mut bad = signed(FALLBACK, NOW, "n1");
        bad.signature = Some("bad".into());
        assert!(auth.authenticate("m1", "PAYLOAD", &bad).await.is_err());
        assert!(matches!(
            auth.authenticate("m1", "PAYLOAD", &signed(FALLBACK, NOW, "n1")).await,
            Err(GatewayError::ReplayDetected)
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_after_signature() {
        let (auth, _, _) = authenticator(2);
        for nonce in ["a", "b"] {
            auth.authenticate("m1", "PAYLOAD", &signed(FALLBACK, NOW, nonce))
                .await
                .unwrap();
        }
        assert_eq!(
            auth.authenticate("m1", "PAYLOAD", &signed(FALLBACK, NOW, "c"))
                .await
                .unwrap_err()
                .code(),
            429
        );
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "Secret"));
        assert!(!constant_time_compare("secret", "secre"));
        assert!(!constant_time_compare("secret", "secrets"));
    }

    #[test]
    fn test_admin_key() {
        let mut headers = HeaderMap::new();
        assert!(check_admin_key(&headers, None));
        assert!(!check_admin_key(&headers, Some("k1")));

        headers.insert("authorization", "Bearer k1".parse().unwrap());
        assert!(check_admin_key(&headers, Some("k1")));
        assert!(!check_admin_key(&headers, Some("k2")));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "k1".parse().unwrap());
        assert!(check_admin_key(&headers, Some("k1")));
    }
}
