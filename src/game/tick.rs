//! Single-step tick of one peer's board.
//!
//! The step must be 100% deterministic: same seed, same ordered inputs,
//! bit-identical trajectory on every peer. No system calls, no floats,
//! all randomness from `state.rng`.

use serde::{Deserialize, Serialize};

use crate::game::settings::{Cell, EdgeMode, Settings};
use crate::game::state::GameState;

/// Events emitted by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickEvent {
    /// An apple was consumed this tick.
    Eat,
    /// The snake died this tick; the board is final.
    Die,
}

/// Result of one tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick: at most one `Eat`, at most one `Die`.
    pub events: Vec<TickEvent>,
}

/// Advance the board by one discrete step.
///
/// Dead boards are inert: ticking them is a no-op with no events.
pub fn tick(state: &mut GameState, settings: &Settings) -> TickResult {
    let mut result = TickResult::default();

    if !state.alive {
        return result;
    }

    // Apply at most one buffered direction change
    if let Some(d) = state.pending_dir.take() {
        if d != state.dir.reverse() {
            state.dir = d;
        }
    }

    state.ticks += 1;

    let (dx, dy) = state.dir.delta();
    let head = state.head();
    let mut next = Cell(head.0 + dx, head.1 + dy);

    match settings.edge_mode {
        EdgeMode::Wrap => {
            next.0 = next.0.rem_euclid(settings.grid_size);
            next.1 = next.1.rem_euclid(settings.grid_size);
        }
        EdgeMode::Wall => {
            if next.0 < 0
                || next.0 >= settings.grid_size
                || next.1 < 0
                || next.1 >= settings.grid_size
            {
                state.alive = false;
                result.events.push(TickEvent::Die);
                return result;
            }
        }
    }

    let eats = state.apples.contains(&next);

    // Self-collision. The tail cell is exempt when the move does not grow
    // the body: the tail vacates it exactly as the head enters.
    let collide_len = if eats {
        state.body.len()
    } else {
        state.body.len().saturating_sub(1)
    };
    if state.body[..collide_len].contains(&next) {
        state.alive = false;
        result.events.push(TickEvent::Die);
        return result;
    }

    state.body.insert(0, next);

    if eats {
        state.apples.retain(|a| *a != next);
        state.score += 1;
        // Replenish immediately so the count stays at apple_count
        if let Some(c) = state.draw_free_cell(settings.grid_size) {
            state.apples.push(c);
        }
        result.events.push(TickEvent::Eat);
    } else {
        state.body.pop();
    }

    result
}
