//! Payload Cryptor.
//!
//! Resolves the key material for a call, decrypts the request payload and
//! seals the response into a signed envelope.
//!
//! ## Key Acquisition
//!
//! Exactly one mode applies per call, chosen by header presence:
//!
//! - `x-key-id`: session key from the [`SessionKeyStore`]
//! - `x-enc-key` (+ `x-enc-mode`, default `rsa`): key/iv JSON blob delivered
//!   base64 (`plain`) or RSA-PKCS#1 wrapped (`rsa`)

pub mod cipher;

pub use cipher::{aes_decrypt, aes_encrypt, hmac_hex, request_signing_string, response_signing_string};

use crate::domain::clock::SharedClock;
use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::{
    b64_decode, b64_encode, fingerprint, Envelope, KeyMaterial, ResponseBody, SecurityHeaders,
};
use crate::keys::{DeviceSecrets, RsaKeyring, SessionKeyStore};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Legacy key delivery mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyMode {
    Plain,
    Rsa,
}

impl LegacyMode {
    /// `plain` selects plain mode; anything else, including absence, is RSA
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(mode) if mode.trim().eq_ignore_ascii_case("plain") => LegacyMode::Plain,
            _ => LegacyMode::Rsa,
        }
    }
}

#[derive(Deserialize)]
struct LegacyKeyBlob {
    key: String,
    iv: String,
}

/// Payload crypto for gateway calls
#[derive(Clone)]
pub struct PayloadCryptor {
    sessions: SessionKeyStore,
    secrets: DeviceSecrets,
    keyring: Arc<RsaKeyring>,
    clock: SharedClock,
}

impl PayloadCryptor {
    pub fn new(
        sessions: SessionKeyStore,
        secrets: DeviceSecrets,
        keyring: Arc<RsaKeyring>,
        clock: SharedClock,
    ) -> Self {
        Self {
            sessions,
            secrets,
            keyring,
            clock,
        }
    }

    /// Key material for a call.
    ///
    /// `x-key-id` wins when both headers are present.
    pub async fn acquire_key(&self, headers: &SecurityHeaders) -> GatewayResult<KeyMaterial> {
        if let Some(kid) = headers.key_id.as_deref() {
            let record = self.sessions.lookup(kid).await.map_err(|e| {
                debug!(kid = kid, error = %e, "Session key unavailable");
                e
            })?;
            return Ok(record.material());
        }

        if let Some(enc_key) = headers.enc_key.as_deref() {
            let mode = LegacyMode::from_header(headers.enc_mode.as_deref());
            return self.parse_legacy_key(enc_key, mode);
        }

        Err(GatewayError::MissingKey)
    }

    /// Decode an `x-enc-key` blob into key material.
    pub fn parse_legacy_key(&self, enc_key: &str, mode: LegacyMode) -> GatewayResult<KeyMaterial> {
        let raw = b64_decode(enc_key)
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| GatewayError::LegacyKey("x-enc-key is not base64".into()))?;

        let blob = match mode {
            LegacyMode::Plain => raw,
            LegacyMode::Rsa => self.keyring.decrypt(&raw)?,
        };

        let parsed: LegacyKeyBlob = serde_json::from_slice(&blob)
            .map_err(|e| GatewayError::LegacyKey(format!("key blob: {}", e)))?;
        let key = b64_decode(&parsed.key)
            .ok_or_else(|| GatewayError::LegacyKey("key is not base64".into()))?;
        let iv = b64_decode(&parsed.iv)
            .ok_or_else(|| GatewayError::LegacyKey("iv is not base64".into()))?;

        KeyMaterial::from_slices(&key, &iv).ok_or_else(|| {
            GatewayError::LegacyKey(format!(
                "expected 32-byte key and 16-byte iv, got {} and {}",
                key.len(),
                iv.len()
            ))
        })
    }

    /// Decrypt a base64 payload and parse it as JSON.
    ///
    /// Every failure stage reports the same `DecryptFailed`.
    pub fn decrypt_request(&self, payload: &str, material: &KeyMaterial) -> GatewayResult<Value> {
        let ciphertext = b64_decode(payload).ok_or(GatewayError::DecryptFailed)?;
        let plaintext = aes_decrypt(material, &ciphertext).ok_or(GatewayError::DecryptFailed)?;
        serde_json::from_slice(&plaintext).map_err(|_| GatewayError::DecryptFailed)
    }

    /// Encrypt and sign a response body for `device_id`.
    ///
    /// The request's IV is reused. Without key material the body is returned
    /// unencrypted.
    pub async fn encrypt_response(
        &self,
        body: &Value,
        material: Option<&KeyMaterial>,
        device_id: &str,
    ) -> GatewayResult<ResponseBody> {
        let Some(material) = material else {
            warn!(device = fingerprint(device_id), "No key material for response, sending plaintext");
            return Ok(ResponseBody::Plain(body.clone()));
        };

        let plaintext = match body {
            Value::String(s) => s.clone().into_bytes(),
            other => serde_json::to_vec(other)
                .map_err(|e| GatewayError::Internal(format!("response serialization: {}", e)))?,
        };
        let data = b64_encode(&aes_encrypt(material, &plaintext));

        let secret = self.secrets.signing_secret(device_id).await?;
        let timestamp = self.clock.now();
        let signature = hmac_hex(
            secret.as_bytes(),
            response_signing_string(timestamp, &data).as_bytes(),
        );

        debug!(
            device = fingerprint(device_id),
            length = data.len(),
            "Response encrypted"
        );

        Ok(ResponseBody::Encrypted(Envelope {
            encrypted: true,
            data,
            timestamp,
            signature,
        }))
    }
}

/// Handler input map from a decrypted payload.
///
/// `{"data": {...}}` is unwrapped to the inner object; non-objects give an
/// empty map.
pub fn request_params(payload: Value) -> Map<String, Value> {
    match payload {
        Value::Object(mut map) => match map.get("data") {
            Some(Value::Object(_)) => match map.remove("data") {
                Some(Value::Object(inner)) => inner,
                _ => Map::new(),
            },
            _ => map,
        },
        _ => Map::new(),
    }
}
