//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. All frames
//! are JSON text with a `type` discriminator. Unknown or malformed frames
//! are dropped at the boundary without a response.

use serde::{Deserialize, Serialize};

use crate::game::settings::{Cell, Settings};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join or create a room. The only message accepted before membership,
    /// besides `list`.
    Hello {
        /// Room key to join.
        room: String,
        /// Persisted client token, keeps the visitor number across reconnects.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        /// Create the room if missing, and claim host.
        #[serde(default)]
        create: bool,
    },

    /// Host-only settings mutation.
    Settings { settings: Settings },

    /// Host-only: mint a fresh seed and round id.
    Restart,

    /// Declare readiness for the next round.
    Ready,

    /// Display name announcement, relayed to the room.
    Name { name: String },

    /// Spectator snapshot of the local board, relayed to the room.
    Preview { body: Vec<Cell>, score: u32 },

    /// Per-tick telemetry, relayed to the room.
    Tick { score: u32, ticks: u32 },

    /// Local round over (death or quit), with the final score.
    Over { score: u32 },

    /// Cosmetic room metadata.
    #[serde(rename = "roommeta")]
    RoomMeta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public: Option<bool>,
    },

    /// Request the room directory.
    List,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection id and stable visitor number, sent once on join.
    Welcome {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        visitor: Option<u32>,
    },

    /// Membership count changed.
    Presence { count: usize },

    /// Host (re)assigned.
    Host { host_id: String },

    /// Effective settings snapshot.
    Settings { settings: Settings },

    /// Authoritative round start parameters. The single point where all
    /// peers' simulations re-synchronize.
    Seed {
        seed: u32,
        settings: Settings,
        #[serde(skip_serializing_if = "Option::is_none")]
        round_id: Option<u64>,
    },

    /// A peer declared readiness.
    Ready { from: String },

    /// Relayed display name, stamped with the sender's connection id.
    Name { from: String, name: String },

    /// Relayed spectator snapshot.
    Preview {
        from: String,
        body: Vec<Cell>,
        score: u32,
    },

    /// Relayed per-tick telemetry.
    Tick { from: String, score: u32, ticks: u32 },

    /// Relayed round-over report.
    Over { from: String, score: u32 },

    /// Room directory snapshot.
    Rooms { items: Vec<RoomInfo> },

    /// Finalized placements for a round.
    Results {
        round_id: u64,
        placements: Vec<Placement>,
    },

    /// Application error, e.g. joining a nonexistent room without create.
    Error {
        code: ErrorCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// One entry in the room directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    /// Room key.
    pub id: String,
    /// Display name from `roommeta`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Connected client count.
    pub count: usize,
}

/// Final placement of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Connection id of the participant.
    pub id: String,
    /// Display name if one was announced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 1-based place.
    pub place: u32,
    /// Final score.
    pub score: u32,
}

/// Error codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Join of a nonexistent room without create intent.
    RoomNotFound,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
