//! Deterministic primitives shared by every peer's simulation.

pub mod rng;

pub use rng::SeededRng;
