// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Lava Relay Shared Library
//!
//! Durable state shared by the relay: the UTM attribution store that
//! correlates a first payment with the recurring payments that follow it.

pub mod attribution;
pub mod error;
pub mod timestamp;

pub use attribution::{AttributionRecord, AttributionStore, TouchOutcome};
pub use error::{StoreError, StoreResult};
