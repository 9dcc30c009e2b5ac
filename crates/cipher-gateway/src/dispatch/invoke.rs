//! Parameter binding and handler invocation.
//!
//! ## Binding Rules (first match wins)
//!
//! 1. No descriptor: untyped invocation
//! 2. Zero declared parameters: invoke with none
//! 3. Single context parameter: pass the context
//! 4. Single value parameter and exactly one input value: pass that value
//!    whatever its key
//! 5. Otherwise each parameter resolves by snake_case name, camelCase name,
//!    exact name, then default; a required parameter left unresolved fails
//!    the binding
//!
//! A handler fault on the bound call is logged and followed by exactly one
//! untyped call. A fault there is returned to the caller.

use super::handler::{CallArgs, HandlerFault, HandlerResult, HandlerTarget, ParamSpec};
use super::params::{adapt_parameters, to_camel, to_snake};
use crate::domain::types::{truncate, RequestContext};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, warn};

/// Fault diagnostics kept in logs
pub const MAX_DIAGNOSTIC_LEN: usize = 2000;

/// Outcome of matching a descriptor against the input
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Positional arguments in descriptor order
    Bound(Vec<Value>),
    /// No usable descriptor; invoke untyped
    Fallback,
    /// Required parameter with no value and no default
    MissingParam(String),
}

/// Bind `target`'s descriptor.
///
/// `input` is the decrypted map as sent; `expanded` is its adapted form.
pub fn bind(
    target: &HandlerTarget,
    input: &Map<String, Value>,
    expanded: &Map<String, Value>,
) -> Binding {
    let Some(params) = target.params.as_deref() else {
        return Binding::Fallback;
    };

    match params {
        [] => return Binding::Bound(Vec::new()),
        [ParamSpec::Context] => return Binding::Bound(vec![Value::Null]),
        [ParamSpec::Value { .. }] if input.len() == 1 => {
            let only = input.values().next().cloned().unwrap_or(Value::Null);
            return Binding::Bound(vec![only]);
        }
        _ => {}
    }

    let mut args = Vec::with_capacity(params.len());
    for param in params {
        match param {
            ParamSpec::Context => args.push(Value::Null),
            ParamSpec::Value {
                name,
                required,
                default,
            } => match lookup(expanded, name).or_else(|| default.clone()) {
                Some(value) => args.push(value),
                None if *required => return Binding::MissingParam(name.clone()),
                None => args.push(Value::Null),
            },
        }
    }
    Binding::Bound(args)
}

/// snake_case, then camelCase, then the declared name. Null counts as absent.
fn lookup(expanded: &Map<String, Value>, name: &str) -> Option<Value> {
    [to_snake(name), to_camel(name), name.to_string()]
        .iter()
        .filter_map(|key| expanded.get(key))
        .find(|value| !value.is_null())
        .cloned()
}

/// Result of a successful dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub value: Value,
    /// The bound call faulted and the untyped call produced `value`
    pub fell_back: bool,
}

/// Why a dispatch produced no value
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeError {
    MissingParam(String),
    Fault(HandlerFault),
}

/// Adapt, bind and invoke
pub async fn invoke(
    target: &HandlerTarget,
    input: Map<String, Value>,
    context: RequestContext,
) -> Result<Invocation, InvokeError> {
    let expanded = adapt_parameters(&input);

    match bind(target, &input, &expanded) {
        Binding::MissingParam(name) => {
            error!(target = %target.name, param = %name, "Missing required parameter");
            Err(InvokeError::MissingParam(name))
        }
        Binding::Bound(args) => {
            let call = CallArgs {
                args,
                input: expanded.clone(),
                context: context.clone(),
                fallback: false,
            };
            match call_guarded(target, call).await {
                Ok(value) => Ok(Invocation {
                    value,
                    fell_back: false,
                }),
                Err(fault) => {
                    warn!(
                        target = %target.name,
                        method = %context.method,
                        fault = %truncate(&fault.to_string(), MAX_DIAGNOSTIC_LEN),
                        "Bound invocation failed, retrying untyped"
                    );
                    untyped(target, expanded, context).await.map(|value| Invocation {
                        value,
                        fell_back: true,
                    })
                }
            }
        }
        Binding::Fallback => {
            debug!(target = %target.name, "No parameter descriptor, invoking untyped");
            untyped(target, expanded, context).await.map(|value| Invocation {
                value,
                fell_back: false,
            })
        }
    }
}

async fn untyped(
    target: &HandlerTarget,
    expanded: Map<String, Value>,
    context: RequestContext,
) -> Result<Value, InvokeError> {
    let call = CallArgs {
        args: Vec::new(),
        input: expanded,
        context,
        fallback: true,
    };
    call_guarded(target, call).await.map_err(|fault| {
        error!(
            target = %target.name,
            fault = %truncate(&fault.to_string(), MAX_DIAGNOSTIC_LEN),
            "Untyped invocation failed"
        );
        InvokeError::Fault(fault)
    })
}

/// Run the handler, turning panics into faults
async fn call_guarded(target: &HandlerTarget, args: CallArgs) -> HandlerResult {
    let future = async move { target.call(args).await };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(HandlerFault::Panicked(message))
        }
    }
}
