//! Wire and record types shared across the gateway.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// AES-256 key length
pub const KEY_LEN: usize = 32;
/// AES-CBC block / IV length
pub const IV_LEN: usize = 16;

// =============================================================================
// KEY MATERIAL
// =============================================================================

/// Symmetric key and IV used for one decrypt/encrypt pair.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub key: [u8; KEY_LEN],
    pub iv: [u8; IV_LEN],
}

impl KeyMaterial {
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// Build from slices, rejecting wrong lengths.
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Option<Self> {
        Some(Self {
            key: key.try_into().ok()?,
            iv: iv.try_into().ok()?,
        })
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial { .. }")
    }
}

// =============================================================================
// SESSION KEYS
// =============================================================================

/// One handshake's session key record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub kid: String,
    #[serde(with = "b64_array")]
    pub key: [u8; KEY_LEN],
    #[serde(with = "b64_array")]
    pub iv: [u8; IV_LEN],
    pub device_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub created_at: i64,
    pub expire_at: i64,
}

impl SessionKey {
    /// A record is valid iff `now < expireAt`
    pub fn is_valid_at(&self, now: i64) -> bool {
        now < self.expire_at
    }

    pub fn material(&self) -> KeyMaterial {
        KeyMaterial::new(self.key, self.iv)
    }

    pub fn summary(&self) -> KeySummary {
        KeySummary {
            kid: self.kid.clone(),
            created_at: self.created_at,
            expire_at: self.expire_at,
        }
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("kid", &self.kid)
            .field("device_id", &self.device_id)
            .field("user_id", &self.user_id)
            .field("created_at", &self.created_at)
            .field("expire_at", &self.expire_at)
            .finish_non_exhaustive()
    }
}

/// Listing entry for `GET /key/list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySummary {
    pub kid: String,
    pub expire_at: i64,
    pub created_at: i64,
}

/// A freshly issued key plus the TTL it was stored with
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub record: SessionKey,
    pub ttl: u64,
}

/// Handshake payload returned by `GET /key`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeData {
    pub kid: String,
    /// base64
    pub key: String,
    /// base64
    pub iv: String,
    pub ttl: u64,
    pub server_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub user_secret: String,
}

// =============================================================================
// GATEWAY CALL
// =============================================================================

/// Body fields of a gateway call: opaque method name and base64 ciphertext
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallFields {
    #[serde(default)]
    pub m: Option<String>,
    #[serde(default)]
    pub d: Option<String>,
}

impl CallFields {
    /// Read `m`/`d` from a JSON or form body, then from the query string.
    ///
    /// Body values win; empty values count as absent.
    pub fn from_parts(content_type: Option<&str>, query: Option<&str>, body: &[u8]) -> Self {
        let is_json = content_type.is_some_and(|ct| ct.contains("json"))
            || body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{');

        let mut fields = if body.is_empty() {
            CallFields::default()
        } else if is_json {
            serde_json::from_slice(body).unwrap_or_default()
        } else {
            CallFields::from_form(body)
        };

        if let Some(query) = query {
            let from_query = CallFields::from_form(query.as_bytes());
            fields.m = non_empty(fields.m).or(from_query.m);
            fields.d = non_empty(fields.d).or(from_query.d);
        }

        fields.m = non_empty(fields.m);
        fields.d = non_empty(fields.d);
        fields
    }

    fn from_form(raw: &[u8]) -> Self {
        let mut fields = CallFields::default();
        for (key, value) in url::form_urlencoded::parse(raw) {
            match key.as_ref() {
                "m" => fields.m = Some(value.into_owned()),
                "d" => fields.d = Some(value.into_owned()),
                _ => {}
            }
        }
        fields
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Security headers of a gateway call
#[derive(Debug, Clone, Default)]
pub struct SecurityHeaders {
    pub timestamp: Option<String>,
    pub nonce: Option<String>,
    pub signature: Option<String>,
    pub device_id: Option<String>,
    pub key_id: Option<String>,
    pub enc_key: Option<String>,
    pub enc_mode: Option<String>,
    pub authorization: Option<String>,
}

impl SecurityHeaders {
    pub const TIMESTAMP: &'static str = "x-timestamp";
    pub const NONCE: &'static str = "x-nonce";
    pub const SIGNATURE: &'static str = "x-signature";
    pub const DEVICE_ID: &'static str = "x-device-id";
    pub const KEY_ID: &'static str = "x-key-id";
    pub const ENC_KEY: &'static str = "x-enc-key";
    pub const ENC_MODE: &'static str = "x-enc-mode";
    pub const AUTHORIZATION: &'static str = "authorization";

    /// Extract from HTTP headers. Empty values count as absent.
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            timestamp: get(Self::TIMESTAMP),
            nonce: get(Self::NONCE),
            signature: get(Self::SIGNATURE),
            device_id: get(Self::DEVICE_ID),
            key_id: get(Self::KEY_ID),
            enc_key: get(Self::ENC_KEY),
            enc_mode: get(Self::ENC_MODE),
            authorization: get(Self::AUTHORIZATION),
        }
    }

    /// Device id or empty string
    pub fn device(&self) -> &str {
        self.device_id.as_deref().unwrap_or("")
    }
}

/// Context handed to handlers that ask for it
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub device_id: String,
    pub key_id: Option<String>,
    pub authorization: Option<String>,
    pub timestamp: i64,
    pub nonce: String,
}

/// Encrypted, signed response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub encrypted: bool,
    /// base64 AES-256-CBC ciphertext
    pub data: String,
    /// Response timestamp covered by the signature
    pub timestamp: i64,
    /// hex HMAC-SHA256 over "{timestamp}\n{data}"
    pub signature: String,
}

/// What the gateway sends back for a call that reached encryption
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Encrypted(Envelope),
    /// No key material could be recovered; body sent as-is
    Plain(serde_json::Value),
}

impl ResponseBody {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ResponseBody::Encrypted(envelope) => {
                serde_json::to_value(envelope).unwrap_or(serde_json::Value::Null)
            }
            ResponseBody::Plain(value) => value.clone(),
        }
    }
}

/// Shorten an identifier for logging
pub fn fingerprint(value: &str) -> &str {
    match value.char_indices().nth(12) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Truncate diagnostics to `max` bytes on a char boundary
pub fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// base64 <-> fixed-size byte array
mod b64_array {
    use super::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let raw = STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)?;
        raw.as_slice().try_into().map_err(|_| {
            serde::de::Error::custom(format!("expected {} bytes, got {}", N, raw.len()))
        })
    }
}

/// Encode bytes as standard base64
pub fn b64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64
pub fn b64_decode(value: &str) -> Option<Vec<u8>> {
    STANDARD.decode(value.trim().as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn sample_key() -> SessionKey {
        SessionKey {
            kid: "k_abc".into(),
            key: [7u8; KEY_LEN],
            iv: [9u8; IV_LEN],
            device_id: "dev1".into(),
            user_id: None,
            created_at: 1_000,
            expire_at: 2_800,
        }
    }

    #[test]
    fn test_session_key_record_format() {
        let json = serde_json::to_value(sample_key()).unwrap();
        assert_eq!(json["deviceId"], "dev1");
        assert_eq!(json["expireAt"], 2_800);
        assert_eq!(json["key"], b64_encode(&[7u8; KEY_LEN]));

        let back: SessionKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample_key());
    }

    #[test]
    fn test_session_key_rejects_short_key() {
        let mut json = serde_json::to_value(sample_key()).unwrap();
        json["key"] = serde_json::Value::String(b64_encode(&[1u8; 16]));
        assert!(serde_json::from_value::<SessionKey>(json).is_err());
    }

    #[test]
    fn test_validity_is_strict() {
        let key = sample_key();
        assert!(key.is_valid_at(2_799));
        assert!(!key.is_valid_at(2_800));
    }

    #[test]
    fn test_debug_redacts_key_bytes() {
        let rendered = format!("{:?} {:?}", sample_key(), sample_key().material());
        assert!(!rendered.contains("[7, 7"));
        assert!(rendered.contains("k_abc"));
    }

    #[test]
    fn test_headers_empty_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert("x-nonce", "".parse().unwrap());
        headers.insert("x-device-id", "dev1".parse().unwrap());
        let parsed = SecurityHeaders::from_headers(&headers);
        assert!(parsed.nonce.is_none());
        assert_eq!(parsed.device(), "dev1");
    }

    #[test]
    fn test_call_fields_sources() {
        let json = CallFields::from_parts(Some("application/json"), None, br#"{"m":"a1","d":"QQ=="}"#);
        assert_eq!(json.m.as_deref(), Some("a1"));
        assert_eq!(json.d.as_deref(), Some("QQ=="));

        // '+' must be percent-encoded in form bodies
        let form = CallFields::from_parts(
            Some("application/x-www-form-urlencoded"),
            None,
            b"m=a1&d=ab%2Bc%3D",
        );
        assert_eq!(form.d.as_deref(), Some("ab+c="));

        let query = CallFields::from_parts(None, Some("m=q1&d=xyz"), b"");
        assert_eq!(query.m.as_deref(), Some("q1"));

        let mixed = CallFields::from_parts(Some("application/json"), Some("m=q1"), br#"{"d":"x","m":""}"#);
        assert_eq!(mixed.m.as_deref(), Some("q1"));
        assert_eq!(mixed.d.as_deref(), Some("x"));

        assert!(CallFields::from_parts(Some("application/json"), None, b"{oops").m.is_none());
    }

    #[test]
    fn test_fingerprint_and_truncate() {
        assert_eq!(fingerprint("abcdefghijklmnop"), "abcdefghijkl");
        assert_eq!(fingerprint("short"), "short");
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("hello", 10), "hello");
    }
}
