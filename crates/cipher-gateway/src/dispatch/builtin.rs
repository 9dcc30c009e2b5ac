//! Built-in `system.*` handlers used for smoke testing a deployment.

use super::handler::{CallArgs, HandlerRegistry, HandlerTarget, ParamSpec};
use crate::domain::clock::SharedClock;
use serde_json::json;

pub const PING: &str = "system.ping";
pub const TIME: &str = "system.time";
pub const ECHO: &str = "system.echo";

/// Register `system.ping`, `system.time` and `system.echo`
pub fn register_builtins(registry: &mut HandlerRegistry, clock: SharedClock) {
    registry.register(HandlerTarget::new(PING, vec![], |_: CallArgs| async {
        Ok(json!({ "code": 0, "data": "pong" }))
    }));

    registry.register(HandlerTarget::new(
        TIME,
        vec![ParamSpec::context()],
        move |args: CallArgs| {
            let now = clock.now();
            async move {
                Ok(json!({
                    "code": 0,
                    "data": { "serverTime": now, "requestTime": args.context.timestamp }
                }))
            }
        },
    ));

    registry.register(HandlerTarget::new(
        ECHO,
        vec![ParamSpec::context()],
        |args: CallArgs| async move {
            Ok(json!({
                "code": 0,
                "data": { "method": args.context.method, "params": args.input }
            }))
        },
    ));
}
