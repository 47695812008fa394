//! Grid vocabulary and room settings.
//!
//! Settings are host-owned and frozen while a round is running; every
//! peer simulates against the same copy distributed with the round seed.

use serde::{Deserialize, Serialize};

/// One grid cell, column then row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Cell(pub i32, pub i32);

/// Movement direction of a snake head.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Dir {
    Up,
    Down,
    Left,
    Right,
}

impl Dir {
    /// Unit step for this direction.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Dir::Up => (0, -1),
            Dir::Down => (0, 1),
            Dir::Left => (-1, 0),
            Dir::Right => (1, 0),
        }
    }

    /// The exact opposite direction.
    pub fn reverse(self) -> Dir {
        match self {
            Dir::Up => Dir::Down,
            Dir::Down => Dir::Up,
            Dir::Left => Dir::Right,
            Dir::Right => Dir::Left,
        }
    }
}

/// What happens at the grid boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeMode {
    /// Both axes wrap modulo grid size.
    Wrap,
    /// Out of bounds is a death.
    Wall,
}

/// Canvas presets, forwarded to peers untouched; the engine never reads it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CanvasSize {
    Small,
    Medium,
    Large,
}

/// Room settings, mutable by the host only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Side length of the square grid.
    pub grid_size: i32,
    /// How many apples the board keeps alive, clamped to 1..=4.
    pub apple_count: u32,
    /// Boundary behavior.
    pub edge_mode: EdgeMode,
    /// Cosmetic canvas preset.
    pub canvas_size: CanvasSize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grid_size: 20,
            apple_count: 1,
            edge_mode: EdgeMode::Wrap,
            canvas_size: CanvasSize::Medium,
        }
    }
}

impl Settings {
    /// Copy with out-of-range fields pulled back into bounds.
    pub fn sanitized(mut self) -> Self {
        self.grid_size = self.grid_size.clamp(6, 64);
        self.apple_count = self.apple_count.clamp(1, 4);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_pairs() {
        for d in [Dir::Up, Dir::Down, Dir::Left, Dir::Right] {
            assert_eq!(d.reverse().reverse(), d);
            assert_ne!(d.reverse(), d);
        }
    }

    #[test]
    fn test_sanitize_clamps_apples() {
        let s = Settings {
            apple_count: 9,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(s.apple_count, 4);

        let s = Settings {
            apple_count: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(s.apple_count, 1);
    }

    #[test]
    fn test_settings_serde_tags() {
        let s = Settings::default();
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"edge_mode\":\"wrap\""));
        assert!(json.contains("\"canvas_size\":\"medium\""));
    }
}
