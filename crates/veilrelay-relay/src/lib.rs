//! `VeilRelay` Relay Server Library
//!
//! Core functionality for the relay:
//! - Registry of connected peers and their announced public keys
//! - Routing of key-exchange and encrypted message frames
//! - Monitor fan-out of every delivered message
//! - TCP connection handling for the NDJSON wire protocol
//!
//! The relay never holds private keys and never decrypts payloads.

pub mod registry;
pub mod router;
pub mod server;
