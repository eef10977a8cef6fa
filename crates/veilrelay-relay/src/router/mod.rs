//! Frame routing between registered peers.

mod forwarder;

pub use forwarder::{MessageRouter, RouterError};
