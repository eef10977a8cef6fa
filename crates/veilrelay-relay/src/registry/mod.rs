//! Connected-peer bookkeeping.

mod connection;

pub use connection::{PeerHandle, PeerProfile, PeerRegistry};
