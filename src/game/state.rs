//! Per-peer board state.
//!
//! Each peer owns exactly one `GameState` for its own snake, seeded from
//! the round seed. Peers never exchange board state, only inputs and
//! spectator previews, so this struct plus the seed is the whole contract.

use serde::{Deserialize, Serialize};

use crate::core::rng::SeededRng;
use crate::game::settings::{Cell, Dir, Settings};

/// Starting body length for a fresh round.
pub const INITIAL_LENGTH: usize = 3;

/// One player's board, advanced one tick at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    /// Occupied cells, head first.
    pub body: Vec<Cell>,
    /// Direction applied on the last tick.
    pub dir: Dir,
    /// Buffered direction change, applied at most once per tick.
    pub pending_dir: Option<Dir>,
    /// Live apples; length is held at `settings.apple_count`.
    pub apples: Vec<Cell>,
    /// False once the snake has died this round.
    pub alive: bool,
    /// Ticks elapsed since the round started.
    pub ticks: u32,
    /// Apples eaten this round.
    pub score: u32,
    /// Round-seeded generator; the only randomness in the simulation.
    #[serde(skip, default = "default_rng")]
    pub rng: SeededRng,
}

fn default_rng() -> SeededRng {
    SeededRng::new(0)
}

impl GameState {
    /// Fresh board for a new round: snake of [`INITIAL_LENGTH`] heading
    /// right from the grid center, apples placed from the seed.
    pub fn new(seed: u32, settings: &Settings) -> Self {
        let mid = settings.grid_size / 2;
        let body: Vec<Cell> = (0..INITIAL_LENGTH as i32)
            .map(|i| Cell(mid - i, mid))
            .collect();

        let mut state = Self {
            body,
            dir: Dir::Right,
            pending_dir: None,
            apples: Vec::new(),
            alive: true,
            ticks: 0,
            score: 0,
            rng: SeededRng::new(seed),
        };

        for _ in 0..settings.apple_count {
            if let Some(c) = state.draw_free_cell(settings.grid_size) {
                state.apples.push(c);
            }
        }

        state
    }

    /// Board from explicit parts; keeps scenario tests honest about the
    /// exact body layout they exercise.
    pub fn from_parts(body: Vec<Cell>, dir: Dir, apples: Vec<Cell>, seed: u32) -> Self {
        Self {
            body,
            dir,
            pending_dir: None,
            apples,
            alive: true,
            ticks: 0,
            score: 0,
            rng: SeededRng::new(seed),
        }
    }

    /// Buffer a direction change for the next tick.
    ///
    /// A 180° reversal of the direction that will be in effect is always
    /// rejected; the head would collide with its own neck.
    pub fn queue_dir(&mut self, d: Dir) {
        let effective = self.pending_dir.unwrap_or(self.dir);
        if d != effective.reverse() {
            self.pending_dir = Some(d);
        }
    }

    /// Draw an unoccupied cell by uniform rejection sampling.
    ///
    /// Returns `None` only when the grid has no free cell left, which the
    /// caller treats as "skip the respawn".
    pub fn draw_free_cell(&mut self, grid_size: i32) -> Option<Cell> {
        let occupied = self.body.len() + self.apples.len();
        if occupied >= (grid_size * grid_size) as usize {
            return None;
        }
        loop {
            let c = Cell(
                self.rng.next_int(grid_size as u32) as i32,
                self.rng.next_int(grid_size as u32) as i32,
            );
            if !self.body.contains(&c) && !self.apples.contains(&c) {
                return Some(c);
            }
        }
    }

    /// Head cell. Body is never empty while the round runs.
    pub fn head(&self) -> Cell {
        self.body[0]
    }
}
