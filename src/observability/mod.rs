//! Observability: structured logging via `tracing`.
//!
//! Library code only emits events and spans. Installing a subscriber is up
//! to the embedding binary, which can use [`init_tracing`] to do it from a
//! [`LoggingConfig`](crate::config::LoggingConfig).

mod tracing_init;

pub use tracing_init::*;
