//! Room-based multiplayer snake coordination.
//!
//! Peers each run their own deterministic simulation; the server never
//! simulates. It coordinates: rooms, host arbitration, ready consensus,
//! seed distribution, telemetry relay and round finalization. Same seed,
//! same ordered inputs, bit-identical trajectory on every peer.
//!
//! - [`core`]: seeded PRNG shared by every simulation
//! - [`game`]: settings, board state and the tick step
//! - [`network`]: wire protocol, rooms, rounds, relay and the server
//! - [`client`]: session state machine and WebSocket adapter
//! - [`scores`]: external leaderboard interface

use std::time::Duration;

pub mod client;
pub mod core;
pub mod game;
pub mod network;
pub mod scores;

pub use game::settings::Settings;
pub use game::state::GameState;
pub use network::{GameServer, GameServerError, ServerConfig};

/// Ready clients needed before a countdown starts on its own. The host
/// can always force one with `restart`.
pub const MIN_READY_TO_START: usize = 2;

/// Countdown between the seed broadcast and the synchronized start.
pub const COUNTDOWN: Duration = Duration::from_secs(3);

/// Upper bound on a round; whatever has been reported by then is final.
pub const ROUND_TIMEOUT: Duration = Duration::from_secs(75);

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
