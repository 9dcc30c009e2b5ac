//! Gateway error types with the numeric codes clients see.
//!
//! Every rejection cause has its own code. Client bodies carry a fixed
//! message per code; the detailed cause stays in the server log.

use crate::dispatch::HandlerFault;
use crate::store::StoreError;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric response codes
pub mod codes {
    pub const OK: i32 = 0;

    // Envelope / header validation
    pub const BAD_REQUEST: i32 = 400;
    pub const LEGACY_KEY_INVALID: i32 = 401;
    pub const ROUTE_NOT_FOUND: i32 = 404;
    pub const RATE_LIMITED: i32 = 429;
    pub const INTERNAL_ERROR: i32 = 500;

    // Authentication
    pub const TIMESTAMP_SKEW: i32 = 4002;
    pub const REPLAY_DETECTED: i32 = 4003;
    pub const SIGNATURE_MISMATCH: i32 = 4006;
    pub const DECRYPT_FAILED: i32 = 4007;
    pub const KEY_EXPIRED: i32 = 4011;

    // Management
    pub const MANAGEMENT_OK: i32 = 200;
    pub const UNAUTHORIZED: i32 = 401;
}

/// Plaintext error body `{code, msg}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: i32,
    #[serde(rename = "msg")]
    pub message: String,
}

impl ApiError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// HTTP status used when this body is sent unencrypted
    pub fn http_status(&self) -> StatusCode {
        match self.code {
            codes::BAD_REQUEST => StatusCode::BAD_REQUEST,
            codes::LEGACY_KEY_INVALID
            | codes::TIMESTAMP_SKEW
            | codes::REPLAY_DETECTED
            | codes::SIGNATURE_MISMATCH
            | codes::DECRYPT_FAILED
            | codes::KEY_EXPIRED => StatusCode::UNAUTHORIZED,
            codes::ROUTE_NOT_FOUND => StatusCode::NOT_FOUND,
            codes::RATE_LIMITED => StatusCode::TOO_MANY_REQUESTS,
            codes::OK | codes::MANAGEMENT_OK => StatusCode::OK,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "code": self.code, "msg": self.message })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Every way a gateway call can be rejected or fail
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// `m` or `d` absent from the call
    #[error("missing method or payload")]
    MissingCallFields,

    /// `x-device-id` absent on a handshake or key administration call
    #[error("missing device id")]
    MissingDevice,

    /// Timestamp absent or outside the allowed skew
    #[error("timestamp skew: ts={ts:?} now={now}")]
    TimestampSkew { ts: Option<i64>, now: i64 },

    #[error("missing nonce")]
    MissingNonce,

    /// Nonce already consumed for this device
    #[error("nonce replay detected")]
    ReplayDetected,

    #[error("missing signature or device id")]
    MissingSignature,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("rate limit exceeded: {count} calls in window")]
    RateLimited { count: i64 },

    /// Neither `x-key-id` nor `x-enc-key` supplied
    #[error("missing encryption key")]
    MissingKey,

    /// Session key absent or past `expireAt`
    #[error("session key expired or unknown: {kid}")]
    KeyExpired { kid: String },

    /// Legacy `x-enc-key` blob could not be turned into key material
    #[error("legacy key parse failed: {0}")]
    LegacyKey(String),

    /// Payload did not decrypt or did not parse as JSON
    #[error("payload decryption failed")]
    DecryptFailed,

    #[error("route not found: {0}")]
    RouteNotFound(String),

    /// A required handler parameter could not be bound
    #[error("missing required parameter: {0}")]
    MissingParam(String),

    /// Handler fault that survived the fallback invocation
    #[error("handler fault: {0}")]
    Handler(#[from] HandlerFault),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Server-side configuration problem (missing private key, etc.)
    #[error("server configuration error: {0}")]
    ServerConfig(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Numeric code reported to the client
    pub fn code(&self) -> i32 {
        match self {
            GatewayError::MissingCallFields
            | GatewayError::MissingDevice
            | GatewayError::MissingNonce
            | GatewayError::MissingSignature
            | GatewayError::MissingKey
            | GatewayError::MissingParam(_) => codes::BAD_REQUEST,
            GatewayError::TimestampSkew { .. } => codes::TIMESTAMP_SKEW,
            GatewayError::ReplayDetected => codes::REPLAY_DETECTED,
            GatewayError::SignatureMismatch => codes::SIGNATURE_MISMATCH,
            GatewayError::RateLimited { .. } => codes::RATE_LIMITED,
            GatewayError::KeyExpired { .. } => codes::KEY_EXPIRED,
            GatewayError::LegacyKey(_) => codes::LEGACY_KEY_INVALID,
            GatewayError::DecryptFailed => codes::DECRYPT_FAILED,
            GatewayError::RouteNotFound(_) => codes::ROUTE_NOT_FOUND,
            GatewayError::Handler(_)
            | GatewayError::Store(_)
            | GatewayError::ServerConfig(_)
            | GatewayError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Client-facing body. Never includes internal detail.
    pub fn to_api_error(&self) -> ApiError {
        let message = match self {
            GatewayError::MissingCallFields => "missing required parameters".to_string(),
            GatewayError::MissingDevice => "missing device id".to_string(),
            GatewayError::TimestampSkew { .. } => "request timestamp out of range".to_string(),
            GatewayError::MissingNonce => "missing nonce".to_string(),
            GatewayError::ReplayDetected => "duplicate request".to_string(),
            GatewayError::MissingSignature => "missing signature or device id".to_string(),
            GatewayError::SignatureMismatch => "signature verification failed".to_string(),
            GatewayError::RateLimited { .. } => "too many requests".to_string(),
            GatewayError::MissingKey => "missing encryption key".to_string(),
            GatewayError::KeyExpired { .. } => {
                "session key expired, please request a new one".to_string()
            }
            GatewayError::LegacyKey(_) => "key parse failed".to_string(),
            GatewayError::DecryptFailed => "request data decryption failed".to_string(),
            GatewayError::RouteNotFound(_) => "method not found".to_string(),
            GatewayError::MissingParam(name) => format!("missing required parameter: {}", name),
            GatewayError::Handler(_)
            | GatewayError::Store(_)
            | GatewayError::ServerConfig(_)
            | GatewayError::Internal(_) => "server error".to_string(),
        };
        ApiError::new(self.code(), message)
    }
}

impl From<&GatewayError> for ApiError {
    fn from(e: &GatewayError) -> Self {
        e.to_api_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_auth_codes() {
        let all = [
            GatewayError::TimestampSkew { ts: None, now: 0 }.code(),
            GatewayError::ReplayDetected.code(),
            GatewayError::SignatureMismatch.code(),
            GatewayError::RateLimited { count: 61 }.code(),
            GatewayError::KeyExpired { kid: "k".into() }.code(),
            GatewayError::DecryptFailed.code(),
        ];
        assert_eq!(all, [4002, 4003, 4006, 429, 4011, 4007]);
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = GatewayError::Internal("db password=hunter2".into());
        let body = err.to_api_error();
        assert_eq!(body.code, 500);
        assert!(!body.message.contains("hunter2"));

        let err = GatewayError::RouteNotFound("secret.method".into());
        assert!(!err.to_api_error().message.contains("secret.method"));
    }

    #[test]
    fn test_missing_param_names_parameter() {
        let body = GatewayError::MissingParam("user_id".into()).to_api_error();
        assert_eq!(body.code, codes::BAD_REQUEST);
        assert!(body.message.contains("user_id"));
    }

    #[test]
    fn test_error_serialization() {
        let json = serde_json::to_value(ApiError::new(4003, "duplicate request")).unwrap();
        assert_eq!(json["code"], 4003);
        assert_eq!(json["msg"], "duplicate request");
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ApiError::new(429, "").http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::new(4011, "").http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::new(404, "").http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::new(500, "").http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
