// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Lava Relay API Library
//!
//! Receives Lava payment webhooks, remembers the UTM attribution of first
//! payments, and relays both first and recurring payments to the SaleBot
//! Chatter callback.

pub mod config;
pub mod error;
pub mod extractor;
pub mod forwarder;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::{ApiError, ApiResult};
pub use forwarder::{DownstreamResponse, ForwardError, Forwarder};
pub use routes::create_router;
pub use state::AppState;
