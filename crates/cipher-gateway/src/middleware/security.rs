//! Pre-authentication layer.
//!
//! When enabled, gateway calls are authenticated and decrypted before they
//! reach the route handler. The [`PreparedCall`] travels as a request
//! extension so the orchestrator does not repeat the work (the nonce has
//! already been consumed by then). Failures are answered here with the
//! plaintext rejection body.

use crate::domain::types::{CallFields, SecurityHeaders};
use crate::gateway::{Gateway, InboundCall};
use crate::middleware::metrics::RequestTimer;
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

/// Pre-authentication layer
#[derive(Clone)]
pub struct PreAuthLayer {
    gateway: Arc<Gateway>,
    max_body: usize,
}

impl PreAuthLayer {
    pub fn new(gateway: Arc<Gateway>, max_body: usize) -> Self {
        Self { gateway, max_body }
    }
}

impl<S> Layer<S> for PreAuthLayer {
    type Service = PreAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PreAuthService {
            inner,
            gateway: Arc::clone(&self.gateway),
            max_body: self.max_body,
        }
    }
}

/// Pre-authentication service
#[derive(Clone)]
pub struct PreAuthService<S> {
    inner: S,
    gateway: Arc<Gateway>,
    max_body: usize,
}

impl<S> Service<Request<Body>> for PreAuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let gateway = Arc::clone(&self.gateway);
        let max_body = self.max_body;

        Box::pin(async move {
            let timer = RequestTimer::new(gateway.metrics());
            let (mut parts, body) = req.into_parts();

            let bytes = match axum::body::to_bytes(body, max_body).await {
                Ok(bytes) => bytes,
                Err(_) => return Ok(StatusCode::PAYLOAD_TOO_LARGE.into_response()),
            };

            let content_type = parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let call = InboundCall {
                fields: CallFields::from_parts(content_type, parts.uri.query(), &bytes),
                headers: SecurityHeaders::from_headers(&parts.headers),
            };

            match gateway.prepare(&call).await {
                Ok(prepared) => {
                    debug!(m = %prepared.method, "Call pre-authenticated");
                    parts.extensions.insert(prepared);
                    inner.call(Request::from_parts(parts, Body::from(bytes))).await
                }
                Err(err) => Ok(gateway.reject(timer, &err).into_response()),
            }
        })
    }
}
