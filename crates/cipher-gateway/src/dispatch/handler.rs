//! Handler descriptors and registry.
//!
//! A [`HandlerTarget`] pairs an async handler function with the parameter
//! descriptor the binder consults. Business handlers live outside the
//! gateway; embedders register them here by target name.

use crate::domain::types::RequestContext;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Handler failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerFault {
    /// Fewer positional arguments than the handler reads
    #[error("expected argument {index}, got {got} arguments")]
    Arity { index: usize, got: usize },
    /// Argument present but not convertible to the handler's type
    #[error("argument {index} type mismatch: {reason}")]
    TypeMismatch { index: usize, reason: String },
    /// Handler reported an error
    #[error("{0}")]
    Failed(String),
    /// Handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerFault {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerFault::Failed(message.into())
    }
}

/// Result type returned by handlers
pub type HandlerResult = Result<Value, HandlerFault>;

type HandlerFn = Arc<dyn Fn(CallArgs) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// One declared handler parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSpec {
    /// Receives the [`RequestContext`]
    Context,
    /// Named value looked up in the adapted input
    Value {
        name: String,
        required: bool,
        default: Option<Value>,
    },
}

impl ParamSpec {
    pub fn context() -> Self {
        ParamSpec::Context
    }

    pub fn required(name: impl Into<String>) -> Self {
        ParamSpec::Value {
            name: name.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        ParamSpec::Value {
            name: name.into(),
            required: false,
            default: None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: Value) -> Self {
        ParamSpec::Value {
            name: name.into(),
            required: false,
            default: Some(default),
        }
    }
}

/// Arguments handed to a handler
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    /// Positional values in descriptor order; context slots hold `Null`
    pub args: Vec<Value>,
    /// Adapted input map (both key spellings)
    pub input: Map<String, Value>,
    pub context: RequestContext,
    /// True for the untyped invocation, where `args` is empty
    pub fallback: bool,
}

impl CallArgs {
    /// Positional argument converted to `T`
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerFault> {
        let value = self.args.get(index).ok_or(HandlerFault::Arity {
            index,
            got: self.args.len(),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| HandlerFault::TypeMismatch {
            index,
            reason: e.to_string(),
        })
    }

    /// Named input value, if present and convertible
    pub fn input<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.input
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// A dispatch target
#[derive(Clone)]
pub struct HandlerTarget {
    pub name: String,
    /// `None` means no descriptor: always invoked untyped
    pub params: Option<Vec<ParamSpec>>,
    func: HandlerFn,
}

impl HandlerTarget {
    pub fn new<F, Fut>(name: impl Into<String>, params: Vec<ParamSpec>, func: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            params: Some(params),
            func: Arc::new(move |args| Box::pin(func(args))),
        }
    }

    /// Target without a parameter descriptor
    pub fn untyped<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            params: None,
            func: Arc::new(move |args| Box::pin(func(args))),
        }
    }

    pub(crate) fn call(&self, args: CallArgs) -> BoxFuture<'static, HandlerResult> {
        (self.func)(args)
    }
}

impl fmt::Debug for HandlerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTarget")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Target name -> handler, built once at startup
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<HandlerTarget>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target, replacing any previous one with the same name
    pub fn register(&mut self, target: HandlerTarget) -> &mut Self {
        self.handlers.insert(target.name.clone(), Arc::new(target));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<HandlerTarget>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
