//! WebSocket Game Server
//!
//! Accepts persistent connections and feeds every inbound frame into one
//! coordinator task that owns the relay. The coordinator processes each
//! command to completion before the next, so room mutation and broadcast
//! are atomic with respect to other clients' messages and no lock guards
//! the registry. A plain liveness endpoint runs on a separate port.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{routing::get, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::relay::{DeadlineKind, Relay, Schedule};
use crate::network::rounds::ConnId;
use crate::scores::{Leaderboard, NoopLeaderboard};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the persistent-connection port.
    pub bind_addr: SocketAddr,
    /// Bind address for the liveness endpoint.
    pub health_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl ServerConfig {
    /// Configuration from the environment: `PORT` (default 8080) for the
    /// socket, `PORT + 1` for liveness.
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            health_addr: SocketAddr::from(([0, 0, 0, 0], port.wrapping_add(1))),
            max_connections: 1000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            health_addr: "0.0.0.0:8081".parse().unwrap(),
            max_connections: 1000,
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Live-connection count against the configured cap. Permits give their
/// slot back when dropped, so closed connections never pin the counter.
#[derive(Debug, Clone)]
struct ConnectionCap {
    max: usize,
    open: Arc<AtomicUsize>,
}

/// One occupied connection slot.
#[derive(Debug)]
struct ConnectionPermit(Arc<AtomicUsize>);

impl ConnectionCap {
    fn new(max: usize) -> Self {
        Self {
            max,
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Claim a slot, or `None` when the cap is reached.
    fn try_acquire(&self) -> Option<ConnectionPermit> {
        let mut current = self.open.load(Ordering::Acquire);
        loop {
            if current >= self.max {
                return None;
            }
            match self.open.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(ConnectionPermit(self.open.clone())),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Commands fed to the coordinator task, in arrival order.
enum Command {
    /// Parsed frame from a connection.
    Frame {
        conn: ConnId,
        sender: mpsc::UnboundedSender<ServerMessage>,
        msg: ClientMessage,
    },
    /// Connection closed.
    Disconnect { conn: ConnId },
    /// An armed deadline fired.
    Deadline {
        room: String,
        round_id: u64,
        kind: DeadlineKind,
    },
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            shutdown_tx,
        }
    }

    /// Run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        self.run_with(Box::new(NoopLeaderboard)).await
    }

    /// Run with an injected leaderboard store.
    pub async fn run_with(&self, leaderboard: Box<dyn Leaderboard>) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("game server listening on {}", self.config.bind_addr);

        let health = TcpListener::bind(self.config.health_addr).await?;
        info!("health endpoint on {}", self.config.health_addr);
        tokio::spawn(run_health_listener(health));

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let coordinator = tokio::spawn(run_coordinator(cmd_rx, cmd_tx.clone(), leaderboard));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let cap = ConnectionCap::new(self.config.max_connections);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let Some(permit) = cap.try_acquire() else {
                                warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            };
                            debug!("new connection from {}", addr);
                            tokio::spawn(handle_connection(stream, cmd_tx.clone(), permit));
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        coordinator.abort();
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// The single cooperative event loop. Owns the relay; handles each command
/// to completion, then arms whatever deadlines the relay asked for.
async fn run_coordinator(
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    leaderboard: Box<dyn Leaderboard>,
) {
    let mut relay = Relay::new(leaderboard);

    while let Some(cmd) = cmd_rx.recv().await {
        let schedules = match cmd {
            Command::Frame { conn, sender, msg } => relay.handle_frame(&conn, &sender, msg),
            Command::Disconnect { conn } => relay.handle_disconnect(&conn),
            Command::Deadline {
                room,
                round_id,
                kind,
            } => relay.handle_deadline(&room, round_id, kind),
        };

        for s in schedules {
            arm_deadline(s, cmd_tx.clone());
        }
    }
}

/// Sleep off a schedule, then feed the deadline back into the loop. The
/// relay discards it if the round it was armed for is gone.
fn arm_deadline(schedule: Schedule, cmd_tx: mpsc::UnboundedSender<Command>) {
    tokio::spawn(async move {
        tokio::time::sleep(schedule.after).await;
        let _ = cmd_tx.send(Command::Deadline {
            room: schedule.room,
            round_id: schedule.round_id,
            kind: schedule.kind,
        });
    });
}

/// One connection: websocket handshake, writer pump from the per-client
/// channel, reader loop feeding parsed frames into the coordinator. The
/// permit is held for the connection's whole lifetime.
async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::UnboundedSender<Command>,
    _permit: ConnectionPermit,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("websocket handshake failed: {}", e);
            return;
        }
    };

    let conn: ConnId = Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Writer pump: serialize and send until the peer goes away
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                // Malformed frames are dropped silently, no response
                match ClientMessage::from_json(&text) {
                    Ok(parsed) => {
                        let _ = cmd_tx.send(Command::Frame {
                            conn: conn.clone(),
                            sender: out_tx.clone(),
                            msg: parsed,
                        });
                    }
                    Err(e) => {
                        debug!(%conn, "dropping malformed frame: {}", e);
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(_) => {
                debug!(%conn, "ignoring non-text frame");
            }
            Err(e) => {
                debug!(%conn, "websocket error: {}", e);
                break;
            }
        }
    }

    let _ = cmd_tx.send(Command::Disconnect { conn: conn.clone() });
    writer.abort();
    debug!(%conn, "connection closed");
}

/// Plain liveness endpoint: `/` and `/health` both answer 200 "ok".
async fn run_health_listener(listener: TcpListener) {
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/health", get(|| async { "ok" }));
    if let Err(e) = axum::serve(listener, app).await {
        error!("health endpoint failed: {}", e);
    }
}
