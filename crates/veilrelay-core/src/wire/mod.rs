//! NDJSON wire protocol spoken between chat clients and the relay.
//!
//! One JSON object per line, discriminated by a `"type"` field. Readers are
//! tolerant: unknown fields are ignored and unknown types surface as
//! `Unknown` frames instead of errors.

mod codec;
mod envelope;
mod types;

pub use codec::{
    DEFAULT_MAX_FRAME_BYTES, encode_line, parse_client_line, parse_client_value,
    parse_server_line, parse_server_value, read_frame, write_frame,
};
pub use envelope::{EncryptedEnvelope, decode_base64, direction_aad, encode_base64, now_millis};
pub use types::*;
