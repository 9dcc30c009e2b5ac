//! Request authentication, rate limiting and the tower layers around the
//! HTTP surface.
//!
//! Layer order: Request → CORS → Tracing → BodyLimit → [PreAuth on `/x`] → Handler
//!
//! The [`RequestAuthenticator`] itself is not a layer; the orchestrator
//! calls it directly, or the optional [`PreAuthLayer`] calls it ahead of
//! the gateway handler.

pub mod auth;
pub mod cors;
pub mod metrics;
pub mod rate_limit;
pub mod security;
pub mod tracing;

pub use auth::{check_admin_key, constant_time_compare, AuthSettings, Authenticated, RequestAuthenticator};
pub use cors::create_cors_layer;
pub use metrics::{GatewayMetrics, RequestTimer};
pub use rate_limit::RateLimiter;
pub use security::{PreAuthLayer, PreAuthService};
pub use self::tracing::TracingLayer;

use crate::domain::config::GatewayConfig;
use crate::gateway::Gateway;
use std::sync::Arc;
use axum::extract::DefaultBodyLimit;
use tower_http::cors::CorsLayer;

/// Middleware stack builder
pub struct MiddlewareStack {
    pub cors: CorsLayer,
    pub tracing: TracingLayer,
    pub body_limit: DefaultBodyLimit,
    /// Present when `security.pre_authenticate` is on
    pub pre_auth: Option<PreAuthLayer>,
}

impl MiddlewareStack {
    /// Create middleware stack from gateway config
    pub fn from_config(config: &GatewayConfig, gateway: &Arc<Gateway>) -> Self {
        Self {
            cors: create_cors_layer(&config.cors),
            tracing: TracingLayer::new(),
            body_limit: DefaultBodyLimit::max(config.http.max_body_size),
            pre_auth: config
                .security
                .pre_authenticate
                .then(|| PreAuthLayer::new(Arc::clone(gateway), config.http.max_body_size)),
        }
    }
}
