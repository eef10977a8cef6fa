//! Headless (line-oriented) mode.
//!
//! Reads commands from an input stream and prints session events to an
//! output stream:
//!
//! - `@name message` sends an encrypted message
//! - `/who` lists participants
//! - `/quit` exits

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use veilrelay_core::wire::RosterEntry;

use crate::connection::{ConnectionError, RelayConnection};
use crate::session::{ChatSession, SessionError, SessionEvent};

/// How often timed-out key exchanges are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum HeadlessError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send { to: String, text: String },
    Who,
    Quit,
    Invalid(String),
}

/// Parse one input line; blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(match line {
        "/quit" | "/exit" => Command::Quit,
        "/who" => Command::Who,
        _ => match line.strip_prefix('@').and_then(|rest| rest.split_once(' ')) {
            Some((to, text)) if !to.is_empty() && !text.trim().is_empty() => Command::Send {
                to: to.to_string(),
                text: text.trim().to_string(),
            },
            _ => Command::Invalid(format!("Usage: @name message, /who, /quit (got {line:?})")),
        },
    })
}

/// Render an event for the terminal.
pub fn render_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Welcome { peer_id } => format!("[connected as {peer_id}]"),
        SessionEvent::RosterChanged { peers, left } => {
            let mut out = format!("[online: {}]", roster_names(peers));
            for gone in left {
                out.push_str(&format!("\n[{} left]", gone.display_name));
            }
            out
        }
        SessionEvent::SecureChannel { display_name, peer_id } => {
            let who = if display_name.is_empty() { peer_id } else { display_name };
            format!("[secure channel with {who} established]")
        }
        SessionEvent::Message {
            from_display_name,
            from,
            text,
            ..
        } => {
            let who = if from_display_name.is_empty() { from } else { from_display_name };
            format!("{who}: {text}")
        }
        SessionEvent::Intercepted(copy) => format!(
            "[{}] {} -> {}: {} (nonce {})",
            copy.note,
            copy.from_display_name,
            copy.to_display_name,
            copy.ciphertext_base64,
            copy.nonce_base64
        ),
        SessionEvent::RelayError { message } => format!("[relay error: {message}]"),
    }
}

fn roster_names(peers: &[RosterEntry]) -> String {
    peers
        .iter()
        .map(|p| {
            if p.is_monitor {
                format!("{} (monitor)", p.display_name)
            } else {
                p.display_name.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run the session until input ends, `/quit`, or the relay disconnects.
pub async fn run<R, W>(
    conn: &mut RelayConnection,
    session: &mut ChatSession,
    input: R,
    mut output: W,
) -> Result<(), HeadlessError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    conn.send(session.register_frame()).await?;
    info!(display_name = %session.display_name(), monitor = session.is_monitor(), "Registered");

    let mut lines = input.lines();
    let mut input_open = true;
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                let Some(line) = line? else {
                    debug!("Input closed");
                    input_open = false;
                    // Monitors keep listening after stdin ends
                    if session.is_monitor() {
                        continue;
                    }
                    break;
                };
                match parse_command(&line) {
                    None => {}
                    Some(Command::Quit) => break,
                    Some(Command::Who) => {
                        let text = format!("[online: {}]", roster_names(session.roster()));
                        emit(&mut output, &text).await?;
                    }
                    Some(Command::Invalid(usage)) => emit(&mut output, &format!("[{usage}]")).await?,
                    Some(Command::Send { to, text }) => {
                        send(conn, session, &mut output, &to, &text).await?;
                    }
                }
            }
            frame = conn.recv() => {
                let Some(frame) = frame else {
                    emit(&mut output, "[disconnected from relay]").await?;
                    break;
                };
                let inbound = session.handle_frame(frame);
                for reply in inbound.replies {
                    conn.send(reply).await?;
                }
                for event in &inbound.events {
                    emit(&mut output, &render_event(event)).await?;
                }
            }
            _ = sweep.tick() => {
                for peer in session.sweep_handshakes() {
                    let name = session.display_name_of(&peer).unwrap_or(peer.as_str()).to_string();
                    emit(&mut output, &format!("[key exchange with {name} timed out]")).await?;
                }
            }
        }
    }
    output.flush().await?;
    Ok(())
}

async fn send<W: AsyncWrite + Unpin>(
    conn: &RelayConnection,
    session: &ChatSession,
    output: &mut W,
    to: &str,
    text: &str,
) -> Result<(), HeadlessError> {
    match session.send_text(to, text) {
        Ok(frame) => {
            conn.send(frame).await?;
            let name = session.resolve(to).map_or(to, |p| p.display_name.as_str());
            emit(output, &format!("me -> {name}: {text}")).await?;
        }
        Err(SessionError::ChannelNotReady { peer, handshake }) => {
            conn.send(handshake).await?;
            emit(
                output,
                &format!("[secure channel to {peer} not ready; key exchange started, resend shortly]"),
            )
            .await?;
        }
        Err(e) => emit(output, &format!("[{e}]")).await?,
    }
    Ok(())
}

async fn emit<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> std::io::Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

#[cfg(test)]
mod tests {
    use veilrelay_core::wire::InterceptedMessage;

    use super::*;

    #[test]
    fn parse_send_command() {
        assert_eq!(
            parse_command("@bob  hello there "),
            Some(Command::Send {
                to: "bob".into(),
                text: "hello there".into()
            })
        );
    }

    #[test]
    fn parse_control_commands() {
        assert_eq!(parse_command("/who"), Some(Command::Who));
        assert_eq!(parse_command(" /quit "), Some(Command::Quit));
        assert_eq!(parse_command("   "), None);
    }

    #[test]
    fn parse_rejects_missing_text() {
        assert!(matches!(parse_command("@bob"), Some(Command::Invalid(_))));
        assert!(matches!(parse_command("@ hi"), Some(Command::Invalid(_))));
        assert!(matches!(parse_command("hello"), Some(Command::Invalid(_))));
    }

    #[test]
    fn render_message_and_placeholder() {
        let event = SessionEvent::Message {
            from: "p1".into(),
            from_display_name: "alice".into(),
            text: crate::session::DECRYPTION_FAILED_PLACEHOLDER.into(),
            decrypted: false,
            timestamp: 0,
        };
        assert_eq!(render_event(&event), "alice: [Decryption failed]");
    }

    #[test]
    fn render_intercepted_shows_ciphertext_and_note() {
        let copy = InterceptedMessage {
            from: "p1".into(),
            to: "p2".into(),
            from_display_name: "alice".into(),
            to_display_name: "bob".into(),
            ciphertext_base64: "Zm9v".into(),
            nonce_base64: "YmFy".into(),
            timestamp: 0,
            note: "INTERCEPTED - Cannot decrypt without private key".into(),
        };
        let text = render_event(&SessionEvent::Intercepted(copy));
        assert!(text.starts_with("[INTERCEPTED"));
        assert!(text.contains("alice -> bob: Zm9v"));
    }

    #[test]
    fn render_roster_marks_monitors() {
        let peers = vec![
            RosterEntry {
                peer_id: "p1".into(),
                display_name: "alice".into(),
                public_key_hex: String::new(),
                is_monitor: false,
            },
            RosterEntry {
                peer_id: "p2".into(),
                display_name: "mallory".into(),
                public_key_hex: String::new(),
                is_monitor: true,
            },
        ];
        let text = render_event(&SessionEvent::RosterChanged {
            peers,
            left: Vec::new(),
        });
        assert_eq!(text, "[online: alice, mallory (monitor)]");
    }
}
