//! Networking: wire protocol, room registry, round coordination, relay
//! routing and the WebSocket server itself.

pub mod protocol;
pub mod relay;
pub mod room;
pub mod rounds;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage};
pub use relay::Relay;
pub use room::RoomRegistry;
pub use server::{GameServer, GameServerError, ServerConfig};
