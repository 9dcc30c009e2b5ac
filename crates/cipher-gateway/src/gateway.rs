//! Gateway Orchestrator.
//!
//! Sequences one gateway call:
//!
//! ```text
//! extract (m, d) -> authenticate -> acquire key + decrypt
//!     -> resolve route -> adapt + invoke -> encrypt + sign
//! ```
//!
//! Failures before route resolution are plaintext `{code, msg}` bodies.
//! Once a key is in hand every handler outcome, errors included, leaves
//! inside an encrypted envelope. Route-not-found stays plaintext 404.

use crate::crypto::{request_params, PayloadCryptor};
use crate::dispatch::{Dispatcher, HandlerRegistry, InvokeError, RouteCache, RouteSource};
use crate::domain::clock::SharedClock;
use crate::domain::config::GatewayConfig;
use crate::domain::error::{codes, ApiError, GatewayError, GatewayResult};
use crate::domain::types::{
    b64_encode, fingerprint, CallFields, HandshakeData, KeyMaterial, KeySummary, RequestContext,
    ResponseBody, SecurityHeaders,
};
use crate::keys::{DeviceSecrets, RsaKeyring, SessionKeyStore};
use crate::middleware::auth::{AuthSettings, RequestAuthenticator};
use crate::middleware::metrics::{GatewayMetrics, RequestTimer};
use crate::middleware::rate_limit::RateLimiter;
use crate::store::SharedStore;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Raw inputs of one gateway call
#[derive(Debug, Clone, Default)]
pub struct InboundCall {
    pub fields: CallFields,
    pub headers: SecurityHeaders,
}

/// Output of authentication and decryption, ready for dispatch.
///
/// Produced either inline by [`Gateway::handle`] or ahead of the handler by
/// the pre-authentication layer, which attaches it as a request extension.
#[derive(Clone)]
pub struct PreparedCall {
    pub method: String,
    pub device_id: String,
    pub timestamp: i64,
    pub nonce: String,
    pub key_id: Option<String>,
    pub authorization: Option<String>,
    pub material: KeyMaterial,
    pub params: Map<String, Value>,
}

impl PreparedCall {
    fn context(&self) -> RequestContext {
        RequestContext {
            method: self.method.clone(),
            device_id: self.device_id.clone(),
            key_id: self.key_id.clone(),
            authorization: self.authorization.clone(),
            timestamp: self.timestamp,
            nonce: self.nonce.clone(),
        }
    }
}

impl std::fmt::Debug for PreparedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCall")
            .field("method", &self.method)
            .field("device_id", &fingerprint(&self.device_id))
            .field("key_id", &self.key_id)
            .field("params", &self.params.len())
            .finish_non_exhaustive()
    }
}

/// What a gateway call sends back
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayReply {
    /// Plaintext `{code, msg}` with a status derived from the code
    Rejected(ApiError),
    /// Encrypted envelope (or plaintext body when no key was recoverable)
    Sealed(ResponseBody),
}

impl GatewayReply {
    /// Plaintext error code, if this is a rejection
    pub fn rejection_code(&self) -> Option<i32> {
        match self {
            GatewayReply::Rejected(err) => Some(err.code),
            GatewayReply::Sealed(_) => None,
        }
    }
}

impl IntoResponse for GatewayReply {
    fn into_response(self) -> Response {
        match self {
            GatewayReply::Rejected(err) => (err.http_status(), Json(err.to_json())).into_response(),
            GatewayReply::Sealed(body) => (StatusCode::OK, Json(body.to_json())).into_response(),
        }
    }
}

/// The orchestrator
pub struct Gateway {
    authenticator: RequestAuthenticator,
    cryptor: PayloadCryptor,
    dispatcher: Dispatcher,
    sessions: SessionKeyStore,
    secrets: DeviceSecrets,
    keyring: Arc<RsaKeyring>,
    metrics: Arc<GatewayMetrics>,
    clock: SharedClock,
}

impl Gateway {
    /// Wire every component from configuration.
    pub fn from_config(
        config: &GatewayConfig,
        store: SharedStore,
        clock: SharedClock,
        keyring: Arc<RsaKeyring>,
        registry: HandlerRegistry,
    ) -> Self {
        let security = &config.security;

        let sessions = SessionKeyStore::new(store.clone(), clock.clone(), config.keys.session_ttl);
        let secrets = DeviceSecrets::new(
            store.clone(),
            clock.clone(),
            config.keys.device_secret_ttl,
            security.fallback_secret.clone(),
        );
        let limiter = RateLimiter::new(
            store.clone(),
            security.rate_limit_window,
            security.rate_limit_capacity,
        );
        let authenticator = RequestAuthenticator::new(
            store,
            secrets.clone(),
            limiter,
            clock.clone(),
            AuthSettings {
                timestamp_skew: security.timestamp_skew,
                nonce_ttl: security.nonce_ttl,
            },
        );
        let cryptor = PayloadCryptor::new(
            sessions.clone(),
            secrets.clone(),
            keyring.clone(),
            clock.clone(),
        );
        let routes = RouteCache::new(RouteSource::from_config(&config.dispatch));
        let dispatcher = Dispatcher::new(Arc::new(routes), Arc::new(registry));

        Self {
            authenticator,
            cryptor,
            dispatcher,
            sessions,
            secrets,
            keyring,
            metrics: Arc::new(GatewayMetrics::new()),
            clock,
        }
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Extract, authenticate, acquire the key and decrypt.
    pub async fn prepare(&self, call: &InboundCall) -> GatewayResult<PreparedCall> {
        let (Some(method), Some(payload)) = (call.fields.m.as_deref(), call.fields.d.as_deref())
        else {
            return Err(GatewayError::MissingCallFields);
        };

        let auth = self
            .authenticator
            .authenticate(method, payload, &call.headers)
            .await?;
        let material = self.cryptor.acquire_key(&call.headers).await?;
        let decrypted = self.cryptor.decrypt_request(payload, &material)?;

        Ok(PreparedCall {
            method: method.to_string(),
            device_id: auth.device_id,
            timestamp: auth.timestamp,
            nonce: auth.nonce,
            key_id: call.headers.key_id.clone(),
            authorization: call.headers.authorization.clone(),
            material,
            params: request_params(decrypted),
        })
    }

    /// Run one gateway call, reusing `prepared` when a prior stage supplied it.
    pub async fn handle(&self, call: InboundCall, prepared: Option<PreparedCall>) -> GatewayReply {
        let timer = RequestTimer::new(self.metrics());

        let prepared = match prepared {
            Some(prepared) => prepared,
            None => match self.prepare(&call).await {
                Ok(prepared) => prepared,
                Err(err) => return self.reject(timer, &err),
            },
        };

        let method = prepared.method.clone();
        let device_id = prepared.device_id.clone();
        let material = prepared.material.clone();

        let body = match self.dispatch(prepared).await {
            Ok(body) => body,
            Err(err @ GatewayError::RouteNotFound(_)) => return self.reject(timer, &err),
            Err(err) => {
                error!(
                    m = %method,
                    device = fingerprint(&device_id),
                    error = %err,
                    "Gateway call failed"
                );
                err.to_api_error().to_json()
            }
        };

        match self
            .cryptor
            .encrypt_response(&body, Some(&material), &device_id)
            .await
        {
            Ok(sealed) => {
                timer.finish(None);
                GatewayReply::Sealed(sealed)
            }
            // Never fall back to plaintext here: the body may carry handler data
            Err(err) => self.reject(timer, &err),
        }
    }

    /// Resolve and invoke. The handler's own value is returned unchanged.
    async fn dispatch(&self, prepared: PreparedCall) -> GatewayResult<Value> {
        let target = self.dispatcher.resolve(&prepared.method)?;
        let context = prepared.context();

        match self
            .dispatcher
            .invoke(&target, prepared.params, context)
            .await
        {
            Ok(invocation) => {
                if invocation.fell_back {
                    self.metrics.record_fallback();
                }
                debug!(m = %prepared.method, target = %target.name, "Handler completed");
                Ok(invocation.value)
            }
            Err(InvokeError::MissingParam(name)) => {
                self.metrics.record_missing_param();
                Err(GatewayError::MissingParam(name))
            }
            Err(InvokeError::Fault(fault)) => {
                self.metrics.record_handler_fault();
                error!(m = %prepared.method, target = %target.name, "Handler fault");
                Err(GatewayError::Handler(fault))
            }
        }
    }

    /// Plaintext rejection with logging and metrics.
    pub fn reject(&self, timer: RequestTimer, err: &GatewayError) -> GatewayReply {
        let body = err.to_api_error();
        if body.code == codes::INTERNAL_ERROR {
            error!(code = body.code, error = %err, "Call rejected");
        } else {
            info!(code = body.code, error = %err, "Call rejected");
        }
        timer.finish(Some(body.code));
        GatewayReply::Rejected(body)
    }

    /// Issue a session key for the device in `x-device-id`.
    pub async fn handshake(&self, headers: &SecurityHeaders) -> GatewayResult<HandshakeData> {
        let device_id = headers
            .device_id
            .as_deref()
            .ok_or(GatewayError::MissingDevice)?;

        if headers.authorization.is_some() {
            // Session keys are not bound to a user yet
            debug!(device = fingerprint(device_id), "Authorization header ignored at handshake");
        }

        let issued = self.sessions.issue(device_id, None).await?;
        let user_secret = self.secrets.get_or_create(device_id).await?;
        self.metrics.record_handshake();

        Ok(HandshakeData {
            kid: issued.record.kid,
            key: b64_encode(&issued.record.key),
            iv: b64_encode(&issued.record.iv),
            ttl: issued.ttl,
            server_time: self.clock.now(),
            public_key: self.keyring.public_key_pem(),
            user_secret,
        })
    }

    pub async fn list_keys(&self, headers: &SecurityHeaders) -> GatewayResult<Vec<KeySummary>> {
        let device_id = headers
            .device_id
            .as_deref()
            .ok_or(GatewayError::MissingDevice)?;
        self.sessions.list_for_device(device_id).await
    }

    pub async fn revoke_keys(&self, headers: &SecurityHeaders) -> GatewayResult<usize> {
        let device_id = headers
            .device_id
            .as_deref()
            .ok_or(GatewayError::MissingDevice)?;
        let revoked = self.sessions.revoke_all_for_device(device_id).await?;
        self.metrics.record_revoked(revoked);
        info!(device = fingerprint(device_id), revoked = revoked, "Session keys revoked");
        Ok(revoked)
    }

    /// Drop the cached route table; the next call reloads it.
    pub fn clear_routes(&self) {
        self.dispatcher.routes().invalidate();
        self.metrics.record_route_reload();
        warn!("Method route cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{aes_decrypt, aes_encrypt, hmac_hex, request_signing_string};
    use crate::dispatch::{register_builtins, CallArgs, HandlerFault, HandlerTarget, ParamSpec};
    use crate::domain::clock::ManualClock;
    use crate::domain::types::{b64_decode, Envelope};
    use crate::store::MemoryCache;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;
    const FALLBACK: &str = "test_secret_key_123456";

    fn gateway() -> Gateway {
        let clock = ManualClock::shared(NOW);
        let store = Arc::new(MemoryCache::new(clock.clone()));
        let mut config = GatewayConfig::default();
        config.dispatch.routes.insert("p".into(), "system.ping".into());
        config.dispatch.routes.insert("u".into(), "user.info".into());
        config.dispatch.routes.insert("boom".into(), "user.boom".into());

        let mut registry = HandlerRegistry::new();
        register_builtins(&mut registry, clock.clone());
        registry
            .register(HandlerTarget::new(
                "user.info",
                vec![ParamSpec::required("user_id")],
                |args: CallArgs| async move {
                    let id: i64 = args.arg(0)?;
                    Ok::<_, HandlerFault>(json!({"code": 0, "data": {"id": id}}))
                },
            ))
            .register(HandlerTarget::untyped("user.boom", |_args: CallArgs| async move {
                Err(HandlerFault::failed("database unreachable at 10.0.0.5"))
            }));

        Gateway::from_config(
            &config,
            store,
            clock,
            Arc::new(RsaKeyring::new(Vec::new(), Vec::new())),
            registry,
        )
    }

    fn material() -> KeyMaterial {
        KeyMaterial::new([7u8; 32], [9u8; 16])
    }

    fn call(method: &str, nonce: &str, payload: &Value) -> InboundCall {
        let material = material();
        let d = b64_encode(&aes_encrypt(&material, payload.to_string().as_bytes()));
        let ts = NOW.to_string();
        let signature = hmac_hex(
            FALLBACK.as_bytes(),
            request_signing_string(&ts, nonce, method, &d).as_bytes(),
        );
        let blob = json!({"key": b64_encode(&material.key), "iv": b64_encode(&material.iv)});
        InboundCall {
            fields: CallFields {
                m: Some(method.to_string()),
                d: Some(d),
            },
            headers: SecurityHeaders {
                timestamp: Some(ts),
                nonce: Some(nonce.to_string()),
                signature: Some(signature),
                device_id: Some("dev1".into()),
                enc_key: Some(b64_encode(blob.to_string().as_bytes())),
                enc_mode: Some("plain".into()),
                ..Default::default()
            },
        }
    }

    fn open(reply: &GatewayReply) -> Value {
        let GatewayReply::Sealed(ResponseBody::Encrypted(Envelope { data, .. })) = reply else {
            panic!("expected envelope, got {:?}", reply);
        };
        let plain = aes_decrypt(&material(), &b64_decode(data).unwrap()).unwrap();
        serde_json::from_slice(&plain).unwrap()
    }

    #[tokio::test]
    async fn test_missing_fields_rejected() {
        let gw = gateway();
        let mut inbound = call("p", "n1", &json!({}));
        inbound.fields.d = None;
        let reply = gw.handle(inbound, None).await;
        assert_eq!(reply.rejection_code(), Some(400));
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let gw = gateway();
        let reply = gw
            .handle(call("u", "n1", &json!({"data": {"userId": 5}})), None)
            .await;
        assert_eq!(open(&reply), json!({"code": 0, "data": {"id": 5}}));
    }

    #[tokio::test]
    async fn test_unknown_route_is_plaintext_404() {
        let gw = gateway();
        let reply = gw.handle(call("nope", "n1", &json!({})), None).await;
        assert_eq!(reply.rejection_code(), Some(404));
    }

    #[tokio::test]
    async fn test_handler_fault_is_sealed_opaque_500() {
        let gw = gateway();
        let reply = gw.handle(call("boom", "n1", &json!({})), None).await;
        let body = open(&reply);
        assert_eq!(body["code"], 500);
        assert!(!body.to_string().contains("10.0.0.5"));
        assert_eq!(
            gw.metrics().handler_faults.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_prepared_call_skips_authentication() {
        let gw = gateway();
        let inbound = call("p", "n1", &json!({}));
        let prepared = gw.prepare(&inbound).await.unwrap();
        assert_eq!(prepared.device_id, "dev1");

        // Same nonce again would be a replay; the prepared output is reused instead
        let reply = gw.handle(inbound, Some(prepared)).await;
        assert_eq!(open(&reply), json!({"code": 0, "data": "pong"}));
    }

    #[tokio::test]
    async fn test_handshake_and_revoke() {
        let gw = gateway();
        let headers = SecurityHeaders {
            device_id: Some("dev1".into()),
            ..Default::default()
        };
        let data = gw.handshake(&headers).await.unwrap();
        assert!(data.kid.starts_with("k_"));
        assert_eq!(b64_decode(&data.key).unwrap().len(), 32);
        assert_eq!(data.server_time, NOW);
        assert!(data.public_key.is_none());

        assert_eq!(gw.list_keys(&headers).await.unwrap().len(), 1);
        assert_eq!(gw.revoke_keys(&headers).await.unwrap(), 1);
        assert!(gw.list_keys(&headers).await.unwrap().is_empty());

        assert!(matches!(
            gw.handshake(&SecurityHeaders::default()).await,
            Err(GatewayError::MissingDevice)
        ));
    }
}
