//! TCP front end of the relay.

mod connection;

pub use connection::{Accept, RelayServer};
