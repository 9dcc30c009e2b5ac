//! Method Dispatcher.
//!
//! Resolves an opaque method name through the cached route table to a
//! registered handler, then adapts parameters and invokes it.

pub mod builtin;
pub mod handler;
pub mod invoke;
pub mod params;
pub mod routes;

pub use builtin::register_builtins;
pub use handler::{CallArgs, HandlerFault, HandlerRegistry, HandlerResult, HandlerTarget, ParamSpec};
pub use invoke::{bind, Binding, Invocation, InvokeError};
pub use params::{adapt_parameters, to_camel, to_snake};
pub use routes::{RouteCache, RouteReport, RouteSource, RouteTable};

use crate::domain::error::{GatewayError, GatewayResult};
use crate::domain::types::RequestContext;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Route cache plus handler registry
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<RouteCache>,
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(routes: Arc<RouteCache>, registry: Arc<HandlerRegistry>) -> Self {
        Self { routes, registry }
    }

    pub fn routes(&self) -> &Arc<RouteCache> {
        &self.routes
    }

    /// Handler for `method`.
    ///
    /// A route whose target is not registered resolves like a missing route.
    pub fn resolve(&self, method: &str) -> GatewayResult<Arc<HandlerTarget>> {
        let target = self
            .routes
            .resolve(method)?
            .ok_or_else(|| GatewayError::RouteNotFound(method.to_string()))?;

        self.registry.get(&target).ok_or_else(|| {
            warn!(m = method, target = %target, "Route target not registered");
            GatewayError::RouteNotFound(method.to_string())
        })
    }

    /// Adapt and invoke a resolved target.
    pub async fn invoke(
        &self,
        target: &HandlerTarget,
        input: Map<String, Value>,
        context: RequestContext,
    ) -> Result<Invocation, InvokeError> {
        invoke::invoke(target, input, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use std::collections::BTreeMap;

    fn dispatcher() -> Dispatcher {
        let mut registry = HandlerRegistry::new();
        register_builtins(&mut registry, ManualClock::shared(0));
        let routes = RouteCache::new(RouteSource::Inline(BTreeMap::from([
            ("p1".to_string(), builtin::PING.to_string()),
            ("dangling".to_string(), "user.missing".to_string()),
        ])));
        Dispatcher::new(Arc::new(routes), Arc::new(registry))
    }

    #[test]
    fn test_resolve() {
        let d = dispatcher();
        assert_eq!(d.resolve("p1").unwrap().name, builtin::PING);
        assert!(matches!(d.resolve("nope"), Err(GatewayError::RouteNotFound(_))));
        assert!(matches!(d.resolve("dangling"), Err(GatewayError::RouteNotFound(_))));
    }

    #[tokio::test]
    async fn test_resolve_and_invoke() {
        let d = dispatcher();
        let target = d.resolve("p1").unwrap();
        let out = d
            .invoke(&target, Map::new(), RequestContext::default())
            .await
            .unwrap();
        assert_eq!(out.value["data"], "pong");
    }
}
