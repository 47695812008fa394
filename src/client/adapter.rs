//! WebSocket adapter for the client session.
//!
//! Owns the socket and its pump tasks; the frontend talks to it through
//! plain [`ClientMessage`] / [`ServerMessage`] values. Deep-linked joins
//! retry the `hello` a few times with a growing delay, covering the window
//! where the link was shared before the host finished creating the room.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};

/// Join retry attempts before giving up on a deep link.
pub const JOIN_RETRY_ATTEMPTS: u32 = 4;
/// Delay before the first retry; doubles each attempt.
pub const JOIN_RETRY_BASE: Duration = Duration::from_millis(250);

/// Where the adapter is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No socket.
    Disconnected,
    /// Socket handshake in flight.
    Connecting,
    /// Pumps running.
    Connected,
}

/// Adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Socket connect or handshake failed.
    #[error("connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,

    /// The room was still missing after every retry.
    #[error("room {0} not found")]
    RoomNotFound(String),

    /// Outbound frame could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One connection's adapter: outbound frames go through
/// [`NetAdapter::send`], inbound messages come out of
/// [`NetAdapter::recv`]. Starts disconnected; a failed or closed
/// connection drops back to disconnected, and reconnecting runs the whole
/// join handshake again under a fresh connection id.
pub struct NetAdapter {
    phase: ConnectionPhase,
    out_tx: Option<mpsc::UnboundedSender<ClientMessage>>,
    in_rx: Option<mpsc::UnboundedReceiver<ServerMessage>>,
}

impl NetAdapter {
    /// Adapter with no socket yet.
    pub fn new() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            out_tx: None,
            in_rx: None,
        }
    }

    /// Connect to a server and start the pump tasks.
    pub async fn connect(&mut self, url: &str) -> Result<(), AdapterError> {
        self.phase = ConnectionPhase::Connecting;
        let (ws_stream, _) = match connect_async(url).await {
            Ok(conn) => conn,
            Err(e) => {
                self.phase = ConnectionPhase::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerMessage>();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("dropping unserializable frame: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                        Ok(parsed) => {
                            if in_tx.send(parsed).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("dropping malformed frame: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });

        self.out_tx = Some(out_tx);
        self.in_rx = Some(in_rx);
        self.phase = ConnectionPhase::Connected;
        Ok(())
    }

    /// Connection phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Queue a frame for sending.
    pub fn send(&self, msg: ClientMessage) -> Result<(), AdapterError> {
        let tx = self.out_tx.as_ref().ok_or(AdapterError::Closed)?;
        tx.send(msg).map_err(|_| AdapterError::Closed)
    }

    /// Next inbound message, waiting if none is buffered. Returns an error
    /// once the connection is gone.
    pub async fn recv(&mut self) -> Result<ServerMessage, AdapterError> {
        let rx = self.in_rx.as_mut().ok_or(AdapterError::Closed)?;
        match rx.recv().await {
            Some(msg) => Ok(msg),
            None => {
                self.phase = ConnectionPhase::Disconnected;
                Err(AdapterError::Closed)
            }
        }
    }

    /// Next inbound message without waiting.
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.in_rx.as_mut()?.try_recv().ok()
    }

    /// Join a room, retrying a missing room with a growing delay.
    ///
    /// Creators never retry; the first `room_not_found` is final for them.
    /// Returns the `welcome` that confirms membership.
    pub async fn join(
        &mut self,
        room: &str,
        client_id: Option<String>,
        create: bool,
    ) -> Result<ServerMessage, AdapterError> {
        let mut delay = JOIN_RETRY_BASE;
        let mut attempt = 0;

        loop {
            self.send(ClientMessage::Hello {
                room: room.to_string(),
                client_id: client_id.clone(),
                create,
            })?;

            // The reply to hello is welcome or error, before anything else
            match self.recv().await? {
                msg @ ServerMessage::Welcome { .. } => return Ok(msg),
                ServerMessage::Error {
                    code: ErrorCode::RoomNotFound,
                    ..
                } => {
                    attempt += 1;
                    if create || attempt >= JOIN_RETRY_ATTEMPTS {
                        return Err(AdapterError::RoomNotFound(room.to_string()));
                    }
                    debug!(room, attempt, "room not found yet, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                other => {
                    debug!(?other, "unexpected reply to hello");
                    return Err(AdapterError::Closed);
                }
            }
        }
    }
}

impl Default for NetAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_adapter_is_disconnected() {
        let adapter = NetAdapter::new();
        assert_eq!(adapter.phase(), ConnectionPhase::Disconnected);
        // No socket: sends fail instead of silently vanishing
        assert!(matches!(
            adapter.send(ClientMessage::List),
            Err(AdapterError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_failed_connect_returns_to_disconnected() {
        // Bind then drop a listener so the port is known-closed
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut adapter = NetAdapter::new();
        let result = adapter.connect(&format!("ws://127.0.0.1:{port}")).await;
        assert!(result.is_err());
        assert_eq!(adapter.phase(), ConnectionPhase::Disconnected);
    }

    #[test]
    fn test_backoff_stays_bounded() {
        let mut delay = JOIN_RETRY_BASE;
        let mut total = Duration::ZERO;
        for _ in 1..JOIN_RETRY_ATTEMPTS {
            total += delay;
            delay *= 2;
        }
        // Worst-case wait before giving up stays under two seconds
        assert!(total < Duration::from_secs(2));
    }

    #[test]
    fn test_adapter_error_display() {
        let e = AdapterError::RoomNotFound("lobby".into());
        assert_eq!(e.to_string(), "room lobby not found");
    }
}
