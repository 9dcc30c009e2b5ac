//! HTTP surface of the gateway.
//!
//! | Route                      | Purpose                               |
//! |----------------------------|---------------------------------------|
//! | `GET /key`                 | Handshake: issue a session key        |
//! | `GET /key/list`            | List the device's live session keys   |
//! | `POST /key/revoke`         | Revoke every session key of a device  |
//! | `POST /x`                  | Encrypted gateway call                |
//! | `POST /admin/routes/clear` | Drop the cached method route table    |
//! | `GET /health`              | Liveness                              |
//! | `GET /metrics`             | Counters as JSON                      |

use crate::dispatch::HandlerRegistry;
use crate::domain::clock::{SharedClock, SystemClock};
use crate::domain::config::{ConfigError, GatewayConfig};
use crate::domain::error::{codes, ApiError, GatewayError};
use crate::domain::types::{CallFields, SecurityHeaders};
use crate::gateway::{Gateway, GatewayReply, InboundCall, PreparedCall};
use crate::keys::RsaKeyring;
use crate::middleware::{check_admin_key, GatewayMetrics, MiddlewareStack};
use crate::store::{cleanup_task, MemoryCache};
use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Gateway service
pub struct GatewayService {
    config: GatewayConfig,
    gateway: Arc<Gateway>,
    cache: MemoryCache,
}

impl GatewayService {
    /// Create the service with the in-memory store and the wall clock
    pub fn new(config: GatewayConfig, registry: HandlerRegistry) -> Result<Self, ConfigError> {
        let clock = SystemClock::shared();
        let keyring = Arc::new(RsaKeyring::new(
            config.keys.private_key_paths.clone(),
            config.keys.public_key_paths.clone(),
        ));
        Self::with_parts(config, MemoryCache::new(clock.clone()), clock, keyring, registry)
    }

    /// Create the service from explicit parts
    pub fn with_parts(
        config: GatewayConfig,
        cache: MemoryCache,
        clock: SharedClock,
        keyring: Arc<RsaKeyring>,
        registry: HandlerRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let gateway = Arc::new(Gateway::from_config(
            &config,
            Arc::new(cache.clone()),
            clock,
            keyring,
            registry,
        ));

        Ok(Self {
            config,
            gateway,
            cache,
        })
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        Arc::clone(&self.gateway)
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        self.gateway.metrics()
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.gateway), &self.config)
    }

    /// Serve until Ctrl+C
    pub async fn run(self) -> std::io::Result<()> {
        let addr = self.config.http_addr();
        let router = self.router();

        let cache = self.cache.clone();
        tokio::spawn(cleanup_task(cache, CLEANUP_INTERVAL));

        info!(
            addr = %addr,
            pre_authenticate = self.config.security.pre_authenticate,
            "Starting cipher gateway"
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Received shutdown signal");
            })
            .await?;

        info!("Cipher gateway stopped");
        Ok(())
    }
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
    admin_key: Option<String>,
}

/// Router with every route and the middleware stack
pub fn build_router(gateway: Arc<Gateway>, config: &GatewayConfig) -> Router {
    let stack = MiddlewareStack::from_config(config, &gateway);
    let state = AppState {
        gateway,
        admin_key: config.admin.api_key.clone(),
    };

    let mut calls = Router::<AppState>::new().route("/x", post(gateway_call));
    if let Some(pre_auth) = stack.pre_auth {
        calls = calls.route_layer(pre_auth);
    }

    Router::new()
        .route("/key", get(handshake))
        .route("/key/list", get(list_keys))
        .route("/key/revoke", post(revoke_keys))
        .route("/admin/routes/clear", post(clear_routes))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .merge(calls)
        .layer(stack.body_limit)
        .layer(stack.tracing)
        .layer(stack.cors)
        .with_state(state)
}

/// Plaintext `{code, msg}` for a failed management call
fn failure(err: &GatewayError) -> Response {
    if err.code() == codes::INTERNAL_ERROR {
        error!(error = %err, "Key management call failed");
    } else {
        warn!(error = %err, "Key management call rejected");
    }
    GatewayReply::Rejected(err.to_api_error()).into_response()
}

async fn handshake(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match state
        .gateway
        .handshake(&SecurityHeaders::from_headers(&headers))
        .await
    {
        Ok(data) => Json(serde_json::json!({ "code": codes::OK, "data": data })).into_response(),
        Err(err) => failure(&err),
    }
}

async fn list_keys(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match state
        .gateway
        .list_keys(&SecurityHeaders::from_headers(&headers))
        .await
    {
        Ok(keys) => Json(serde_json::json!({ "code": codes::OK, "data": keys })).into_response(),
        Err(err) => failure(&err),
    }
}

async fn revoke_keys(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match state
        .gateway
        .revoke_keys(&SecurityHeaders::from_headers(&headers))
        .await
    {
        Ok(revoked) => Json(serde_json::json!({
            "code": codes::OK,
            "msg": "OK",
            "data": { "revoked": revoked }
        }))
        .into_response(),
        Err(err) => failure(&err),
    }
}

async fn gateway_call(
    State(state): State<AppState>,
    prepared: Option<Extension<PreparedCall>>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> GatewayReply {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let call = InboundCall {
        fields: CallFields::from_parts(content_type, uri.query(), &body),
        headers: SecurityHeaders::from_headers(&headers),
    };
    state
        .gateway
        .handle(call, prepared.map(|Extension(p)| p))
        .await
}

async fn clear_routes(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !check_admin_key(&headers, state.admin_key.as_deref()) {
        warn!("Route cache clear refused: bad admin key");
        let body = ApiError::new(codes::UNAUTHORIZED, "unauthorized");
        return (StatusCode::UNAUTHORIZED, Json(body.to_json())).into_response();
    }

    state.gateway.clear_routes();
    Json(ApiError::new(codes::MANAGEMENT_OK, "method route cache cleared").to_json()).into_response()
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "version": crate::VERSION
        })),
    )
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.metrics().to_json())
}
