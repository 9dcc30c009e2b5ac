//! Domain types for the gateway.
//!
//! Configuration, error codes, wire/record types and the clock.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigError, GatewayConfig};
pub use error::{codes, ApiError, GatewayError, GatewayResult};
pub use types::*;
