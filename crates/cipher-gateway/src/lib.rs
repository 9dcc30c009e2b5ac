//! Cipher Gateway - encrypted API gateway in front of opaque business handlers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        CIPHER GATEWAY                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  GET /key  GET /key/list  POST /key/revoke    POST /x            │
//! │      │            │             │                │               │
//! │      └────────────┴──────┬──────┘                │               │
//! │                          ▼                       ▼               │
//! │                  Session Key Store     Request Authenticator     │
//! │                          │            (ts → nonce → hmac → rate) │
//! │                          │                       │               │
//! │                          │               Payload Cryptor         │
//! │                          │          (session / legacy key, AES)  │
//! │                          │                       │               │
//! │                          │              Method Dispatcher        │
//! │                          │       (route cache → adapt → invoke)  │
//! │                          │                       │               │
//! │                          ▼                       ▼               │
//! │                   Shared Cache (session keys, nonces, counters)  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cipher_gateway::{register_builtins, GatewayConfig, GatewayService, HandlerRegistry};
//!
//! let mut registry = HandlerRegistry::new();
//! register_builtins(&mut registry, cipher_gateway::SystemClock::shared());
//! let service = GatewayService::new(GatewayConfig::default(), registry)?;
//! service.run().await?;
//! ```
//!
//! # Security
//!
//! - Timestamp freshness and single-use nonces (atomic conditional set)
//! - HMAC-SHA256 request signatures compared in constant time
//! - Per-(device, method) fixed-window rate limiting
//! - AES-256-CBC payloads; responses signed over `"{ts}\n{data}"`
//! - Client bodies never carry internal error detail

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod crypto;
pub mod dispatch;
pub mod domain;
pub mod gateway;
pub mod keys;
pub mod middleware;
pub mod service;
pub mod store;

// Re-exports for public API
pub use dispatch::{register_builtins, CallArgs, HandlerFault, HandlerRegistry, HandlerTarget, ParamSpec};
pub use domain::clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use domain::config::GatewayConfig;
pub use domain::error::{codes, ApiError, GatewayError, GatewayResult};
pub use domain::types::*;
pub use gateway::{Gateway, GatewayReply, InboundCall, PreparedCall};
pub use middleware::GatewayMetrics;
pub use service::{build_router, GatewayService};
pub use store::{MemoryCache, SharedCache};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
