//! Test harness: a gateway on a manual clock plus a client that encrypts
//! and signs the way a device does.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use cipher_gateway::crypto::{
    aes_decrypt, aes_encrypt, hmac_hex, request_signing_string, response_signing_string,
};
use cipher_gateway::keys::RsaKeyring;
use cipher_gateway::{
    b64_decode, b64_encode, register_builtins, CallArgs, GatewayConfig, GatewayService,
    HandlerFault, HandlerRegistry, HandlerTarget, KeyMaterial, ManualClock, MemoryCache,
    ParamSpec,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

pub const NOW: i64 = 1_700_000_000;
pub const FALLBACK_SECRET: &str = "test_secret_key_123456";
pub const ADMIN_KEY: &str = "admin-key-for-tests";

pub struct TestGateway {
    pub router: Router,
    pub clock: Arc<ManualClock>,
    /// Same store the gateway reads
    pub cache: MemoryCache,
    pub service: GatewayService,
    nonces: AtomicU64,
}

/// Routes every test config starts from
pub fn base_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.admin.api_key = Some(ADMIN_KEY.to_string());
    for (method, target) in [
        ("p1", "system.ping"),
        ("t1", "system.time"),
        ("e1", "system.echo"),
        ("user.info", "user.info"),
        ("u2", "user.page"),
        ("u3", "user.boom"),
        ("ghost", "user.unregistered"),
    ] {
        config
            .dispatch
            .routes
            .insert(method.to_string(), target.to_string());
    }
    config
}

fn registry(clock: Arc<ManualClock>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    register_builtins(&mut registry, clock);
    registry
        .register(HandlerTarget::new(
            "user.info",
            vec![ParamSpec::required("user_id")],
            |args: CallArgs| async move {
                let id: i64 = args.arg(0)?;
                Ok::<_, HandlerFault>(json!({ "code": 0, "data": { "id": id, "name": format!("user{}", id) } }))
            },
        ))
        .register(HandlerTarget::new(
            "user.page",
            vec![
                ParamSpec::required("page_no"),
                ParamSpec::with_default("page_size", json!(20)),
            ],
            |args: CallArgs| async move {
                if args.fallback {
                    return Ok::<_, HandlerFault>(json!({ "code": 0, "data": { "fallback": true } }));
                }
                let page: u32 = args.arg(0)?;
                let size: u32 = args.arg(1)?;
                Ok::<_, HandlerFault>(json!({ "code": 0, "data": { "page": page, "size": size } }))
            },
        ))
        .register(HandlerTarget::untyped("user.boom", |_: CallArgs| async move {
            Err(HandlerFault::failed("connection refused: mysql://10.1.2.3"))
        }));
    registry
}

pub fn gateway(config: GatewayConfig) -> TestGateway {
    gateway_with_keyring(config, RsaKeyring::new(Vec::new(), Vec::new()))
}

pub fn gateway_with_keyring(config: GatewayConfig, keyring: RsaKeyring) -> TestGateway {
    let clock = ManualClock::shared(NOW);
    let cache = MemoryCache::new(clock.clone());
    let service = GatewayService::with_parts(
        config,
        cache.clone(),
        clock.clone(),
        Arc::new(keyring),
        registry(clock.clone()),
    )
    .unwrap();
    TestGateway {
        router: service.router(),
        clock,
        cache,
        service,
        nonces: AtomicU64::new(0),
    }
}

impl TestGateway {
    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub fn fresh_nonce(&self) -> String {
        format!("nonce-{}", self.nonces.fetch_add(1, Ordering::Relaxed))
    }

    pub fn now(&self) -> i64 {
        use cipher_gateway::Clock;
        self.clock.now()
    }

    /// `GET /key` for `device`
    pub async fn handshake(&self, device: &str) -> Client {
        let (status, body) = self
            .send(
                Request::get("/key")
                    .header("x-device-id", device)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "handshake failed: {}", body);
        assert_eq!(body["code"], 0);

        let data = &body["data"];
        let key = b64_decode(data["key"].as_str().unwrap()).unwrap();
        let iv = b64_decode(data["iv"].as_str().unwrap()).unwrap();
        Client {
            device: device.to_string(),
            secret: data["userSecret"].as_str().unwrap().to_string(),
            material: KeyMaterial::from_slices(&key, &iv).unwrap(),
            mode: KeyMode::Session(data["kid"].as_str().unwrap().to_string()),
        }
    }

    /// Sign, send and return status plus body
    pub async fn call(&self, client: &Client, method: &str, payload: &Value) -> (StatusCode, Value) {
        let req = client.request(method, payload, &self.fresh_nonce(), self.now());
        self.send(req).await
    }
}

/// How a client hands its key to the gateway
#[derive(Clone)]
pub enum KeyMode {
    Session(String),
    /// `x-enc-key` value and `x-enc-mode`
    Legacy { enc_key: String, mode: String },
}

#[derive(Clone)]
pub struct Client {
    pub device: String,
    pub secret: String,
    pub material: KeyMaterial,
    pub mode: KeyMode,
}

impl Client {
    /// Client using legacy `plain` mode, signing with the fallback secret
    pub fn legacy_plain(device: &str, material: KeyMaterial) -> Self {
        let blob = json!({ "key": b64_encode(&material.key), "iv": b64_encode(&material.iv) });
        Client {
            device: device.to_string(),
            secret: FALLBACK_SECRET.to_string(),
            material,
            mode: KeyMode::Legacy {
                enc_key: b64_encode(blob.to_string().as_bytes()),
                mode: "plain".to_string(),
            },
        }
    }

    pub fn encrypt(&self, payload: &Value) -> String {
        b64_encode(&aes_encrypt(&self.material, payload.to_string().as_bytes()))
    }

    pub fn sign(&self, ts: &str, nonce: &str, method: &str, data: &str) -> String {
        hmac_hex(
            self.secret.as_bytes(),
            request_signing_string(ts, nonce, method, data).as_bytes(),
        )
    }

    /// JSON-bodied `POST /x`
    pub fn request(&self, method: &str, payload: &Value, nonce: &str, ts: i64) -> Request<Body> {
        let d = self.encrypt(payload);
        let ts = ts.to_string();
        let signature = self.sign(&ts, nonce, method, &d);
        let builder = Request::post("/x")
            .header("content-type", "application/json")
            .header("x-timestamp", &ts)
            .header("x-nonce", nonce)
            .header("x-signature", signature)
            .header("x-device-id", &self.device);
        let builder = match &self.mode {
            KeyMode::Session(kid) => builder.header("x-key-id", kid),
            KeyMode::Legacy { enc_key, mode } => builder
                .header("x-enc-key", enc_key)
                .header("x-enc-mode", mode),
        };
        builder
            .body(Body::from(json!({ "m": method, "d": d }).to_string()))
            .unwrap()
    }

    /// Verify the envelope signature and decrypt it
    pub fn open(&self, envelope: &Value) -> Value {
        assert_eq!(envelope["encrypted"], true, "not an envelope: {}", envelope);
        let data = envelope["data"].as_str().unwrap();
        let ts = envelope["timestamp"].as_i64().unwrap();
        let expected = hmac_hex(
            self.secret.as_bytes(),
            response_signing_string(ts, data).as_bytes(),
        );
        assert_eq!(envelope["signature"].as_str().unwrap(), expected);

        let plain = aes_decrypt(&self.material, &b64_decode(data).unwrap()).unwrap();
        serde_json::from_slice(&plain).unwrap()
    }
}
