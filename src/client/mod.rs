//! Client-side pieces: the pure session state machine and the WebSocket
//! adapter that feeds it.

pub mod adapter;
pub mod session;

pub use adapter::{AdapterError, ConnectionPhase, NetAdapter};
pub use session::{LocalSession, PeerView, SessionPhase};
