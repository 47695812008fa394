//! External leaderboard interface.
//!
//! Score persistence and ranking live outside this process; the
//! coordinator only pushes finalized round results through this trait and
//! never blocks on it. The default sink discards everything.

/// One finalized score line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreEntry {
    /// Display name, falling back to the connection id.
    pub name: String,
    /// Final round score.
    pub score: u32,
}

/// Submit/fetch/rank surface of the external leaderboard store.
pub trait Leaderboard: Send {
    /// Submit one round's entries. Called exactly once per finalized round.
    fn submit(&mut self, room: &str, entries: &[ScoreEntry]);

    /// Top entries, best first.
    fn fetch_top(&self, limit: usize) -> Vec<ScoreEntry>;

    /// 1-based rank of a name, if present.
    fn rank_of(&self, name: &str) -> Option<usize>;
}

/// Leaderboard that discards submissions. Used when no store is wired up.
#[derive(Debug, Default)]
pub struct NoopLeaderboard;

impl Leaderboard for NoopLeaderboard {
    fn submit(&mut self, _room: &str, _entries: &[ScoreEntry]) {}

    fn fetch_top(&self, _limit: usize) -> Vec<ScoreEntry> {
        Vec::new()
    }

    fn rank_of(&self, _name: &str) -> Option<usize> {
        None
    }
}
