//! `VeilRelay` Core Library
//!
//! Shared functionality for `VeilRelay` components:
//! - NDJSON wire protocol spoken between clients and the relay
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
