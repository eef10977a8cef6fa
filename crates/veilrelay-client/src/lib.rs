//! `VeilRelay` Chat Client Library
//!
//! - [`session::ChatSession`]: sans-IO protocol driver owning the session
//!   keypair and per-peer secrets
//! - [`connection::RelayConnection`]: NDJSON-over-TCP link to the relay
//! - [`headless`]: line-oriented terminal front end

pub mod connection;
pub mod headless;
pub mod session;
