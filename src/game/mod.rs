//! Deterministic per-peer simulation.
//!
//! Everything in this module replays bit-identically from a round seed
//! and an ordered input sequence. The coordination layer in `network/`
//! never inspects or corrects it.

pub mod settings;
pub mod state;
pub mod tick;

pub use settings::{CanvasSize, Cell, Dir, EdgeMode, Settings};
pub use state::GameState;
pub use tick::{tick, TickEvent, TickResult};
