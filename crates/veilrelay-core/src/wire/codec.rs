//! Line codec: encode frames as NDJSON and parse them back tolerantly.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::types::{ClientFrame, ServerFrame};
use crate::error::{Error, Result};

/// Default upper bound for a single frame, excluding the newline.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Serialize a frame as one JSON line terminated by `\n`.
pub fn encode_line<T: Serialize>(frame: &T) -> Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line sent by a client.
pub fn parse_client_line(line: &str) -> Result<ClientFrame> {
    let raw: Value = serde_json::from_str(line)?;
    parse_client_value(&raw)
}

pub fn parse_client_value(raw: &Value) -> Result<ClientFrame> {
    let msg_type = frame_type(raw)?;
    Ok(match msg_type {
        "register" => ClientFrame::Register(payload(raw, msg_type)?),
        "exchange-key" => ClientFrame::ExchangeKey(payload(raw, msg_type)?),
        "exchange-key-back" => ClientFrame::ExchangeKeyBack(payload(raw, msg_type)?),
        "message" => ClientFrame::Message(payload(raw, msg_type)?),
        _ => ClientFrame::Unknown {
            msg_type: msg_type.to_string(),
            payload: raw.clone(),
        },
    })
}

/// Parse one line sent by the relay.
pub fn parse_server_line(line: &str) -> Result<ServerFrame> {
    let raw: Value = serde_json::from_str(line)?;
    parse_server_value(&raw)
}

pub fn parse_server_value(raw: &Value) -> Result<ServerFrame> {
    let msg_type = frame_type(raw)?;
    Ok(match msg_type {
        "welcome" => ServerFrame::Welcome(payload(raw, msg_type)?),
        "roster" => ServerFrame::Roster(payload(raw, msg_type)?),
        "exchange-key" => ServerFrame::ExchangeKey(payload(raw, msg_type)?),
        "exchange-key-back" => ServerFrame::ExchangeKeyBack(payload(raw, msg_type)?),
        "message" => ServerFrame::Message(payload(raw, msg_type)?),
        "intercepted" => ServerFrame::Intercepted(payload(raw, msg_type)?),
        "error" => ServerFrame::Error(payload(raw, msg_type)?),
        _ => ServerFrame::Unknown {
            msg_type: msg_type.to_string(),
            payload: raw.clone(),
        },
    })
}

fn frame_type(raw: &Value) -> Result<&str> {
    raw.get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Frame("Missing 'type' field".into()))
}

fn payload<T: DeserializeOwned>(raw: &Value, msg_type: &str) -> Result<T> {
    serde_json::from_value(raw.clone())
        .map_err(|e| Error::Frame(format!("Malformed '{msg_type}' frame: {e}")))
}

/// Read the next line, rejecting lines longer than `max_bytes`.
///
/// Returns `Ok(None)` on a clean end of stream. A trailing line without a
/// newline is still returned. The stream is left mid-line after
/// `FrameTooLarge`, so callers should drop the connection.
pub async fn read_frame<R>(reader: &mut R, max_bytes: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if buf.is_empty() {
                return Ok(None);
            }
            break;
        }

        let (consumed, line_len, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (i + 1, i, true),
            None => (available.len(), available.len(), false),
        };

        let actual = buf.len() + line_len;
        if actual > max_bytes {
            reader.consume(consumed);
            return Err(Error::FrameTooLarge {
                limit: max_bytes,
                actual,
            });
        }

        buf.extend_from_slice(&available[..line_len]);
        reader.consume(consumed);
        if done {
            break;
        }
    }

    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| Error::Frame(format!("Frame is not valid UTF-8: {e}")))
}

/// Write one frame and flush.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = encode_line(frame)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::io::BufReader;

    use super::*;
    use crate::wire::types::*;

    #[test]
    fn client_frames_use_type_tag_and_camel_case() {
        let frame = ClientFrame::Register(RegisterPayload {
            display_name: "alice".into(),
            public_key_hex: "02ab".into(),
            is_monitor: false,
        });
        let line = encode_line(&frame).unwrap();
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "register");
        assert_eq!(value["displayName"], "alice");
        assert_eq!(value["publicKeyHex"], "02ab");
        assert_eq!(value["isMonitor"], false);
    }

    #[test]
    fn parse_exchange_key_back() {
        let frame =
            parse_client_line(r#"{"type":"exchange-key-back","to":"p1","publicKeyHex":"03ff"}"#)
                .unwrap();
        assert_eq!(
            frame,
            ClientFrame::ExchangeKeyBack(KeyExchangeTo {
                to: "p1".into(),
                public_key_hex: "03ff".into(),
            })
        );
        assert_eq!(frame.frame_type(), "exchange-key-back");
    }

    #[test]
    fn parse_server_message_tolerates_extra_fields() {
        let line = r#"{"type":"message","from":"p2","ciphertextBase64":"AA==","nonceBase64":"AQ==","timestamp":5,"ttl":99}"#;
        let ServerFrame::Message(msg) = parse_server_line(line).unwrap() else {
            panic!("expected message frame");
        };
        assert_eq!(msg.from, "p2");
        assert_eq!(msg.timestamp, 5);
        assert!(msg.from_display_name.is_empty());
    }

    #[test]
    fn unknown_type_is_preserved() {
        let frame = parse_server_line(r#"{"type":"typing","from":"p2"}"#).unwrap();
        let ServerFrame::Unknown { msg_type, payload } = frame else {
            panic!("expected unknown frame");
        };
        assert_eq!(msg_type, "typing");
        assert_eq!(payload["from"], "p2");
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(matches!(
            parse_client_line(r#"{"to":"p1"}"#),
            Err(Error::Frame(_))
        ));
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let result = parse_client_line(r#"{"type":"message","to":"p1"}"#);
        assert!(matches!(result, Err(Error::Frame(msg)) if msg.contains("message")));
    }

    #[test]
    fn invalid_json_is_a_json_error() {
        assert!(matches!(parse_server_line("{nope"), Err(Error::Json(_))));
    }

    #[test]
    fn unknown_frames_cannot_be_encoded() {
        let frame = ServerFrame::Unknown {
            msg_type: "typing".into(),
            payload: Value::Null,
        };
        assert!(encode_line(&frame).is_err());
    }

    #[tokio::test]
    async fn read_frame_splits_lines() {
        let data = b"{\"a\":1}\r\n{\"b\":2}\nlast";
        let mut reader = BufReader::new(&data[..]);
        assert_eq!(
            read_frame(&mut reader, 64).await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(
            read_frame(&mut reader, 64).await.unwrap().as_deref(),
            Some("{\"b\":2}")
        );
        assert_eq!(
            read_frame(&mut reader, 64).await.unwrap().as_deref(),
            Some("last")
        );
        assert!(read_frame(&mut reader, 64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_frame_rejects_oversized_line() {
        let data = vec![b'x'; 100];
        let mut reader = BufReader::with_capacity(16, &data[..]);
        let err = read_frame(&mut reader, 32).await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { limit: 32, .. }));
    }

    #[tokio::test]
    async fn read_frame_accepts_line_at_limit() {
        let mut data = vec![b'y'; 32];
        data.push(b'\n');
        let mut reader = BufReader::with_capacity(8, &data[..]);
        let line = read_frame(&mut reader, 32).await.unwrap().unwrap();
        assert_eq!(line.len(), 32);
    }

    #[tokio::test]
    async fn write_then_read_server_frame() {
        let frame = ServerFrame::Welcome(Welcome {
            peer_id: "p-1".into(),
        });
        let mut out = Vec::new();
        write_frame(&mut out, &frame).await.unwrap();

        let mut reader = BufReader::new(&out[..]);
        let line = read_frame(&mut reader, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse_server_line(&line).unwrap(), frame);
    }
}
