//! Round Lifecycle Coordinator
//!
//! Per-room state machine: idle -> countdown -> active -> finalizing ->
//! results -> idle. The coordinator owns readiness consensus, the
//! participants snapshot, finish-order tracking and the exactly-once
//! finalize guard. Timers live in the IO layer; this module only reacts
//! to events.

use std::collections::HashMap;

use crate::network::protocol::Placement;

/// Connection identifier, unique for the process lifetime.
pub type ConnId = String;

/// Phase of the room's current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// No round in progress; ready flags accumulate.
    Idle,
    /// Seed broadcast, fixed-duration countdown running.
    Countdown,
    /// Every participant simulates locally; `over` reports accumulate.
    Active,
    /// Finalize pass has been claimed for this round.
    Finalizing,
}

/// Coordinator-owned round state for one room.
#[derive(Debug)]
pub struct RoundState {
    /// Current phase.
    pub phase: RoundPhase,
    /// Round identifier, replaced on every countdown entry. Never reused.
    pub round_id: u64,
    /// Clients that were ready when the countdown expired, in join order.
    pub participants: Vec<ConnId>,
    /// Participants that reported `over`, in arrival order (tie-break).
    pub finished: Vec<ConnId>,
    /// Last known score per participant.
    pub scores: HashMap<ConnId, u32>,
    /// Set once the finalize pass has run for `round_id`.
    finalized: bool,
}

impl RoundState {
    /// Fresh idle state.
    pub fn new() -> Self {
        Self {
            phase: RoundPhase::Idle,
            round_id: 0,
            participants: Vec::new(),
            finished: Vec::new(),
            scores: HashMap::new(),
            finalized: false,
        }
    }

    /// Drop back to idle, discarding any in-flight round bookkeeping.
    /// Called when room composition changes and after results go out.
    /// The round id is monotonic and survives the reset, so deadlines
    /// scheduled against an abandoned round can never match again.
    pub fn reset(&mut self) {
        self.phase = RoundPhase::Idle;
        self.participants.clear();
        self.finished.clear();
        self.scores.clear();
        self.finalized = false;
    }

    /// Enter countdown for a fresh round. Returns the new round id.
    pub fn begin_countdown(&mut self) -> u64 {
        self.round_id += 1;
        self.phase = RoundPhase::Countdown;
        self.participants.clear();
        self.finished.clear();
        self.scores.clear();
        self.finalized = false;
        self.round_id
    }

    /// Countdown expired: snapshot the participants and go active.
    pub fn begin_active(&mut self, participants: Vec<ConnId>) {
        self.participants = participants;
        self.phase = RoundPhase::Active;
    }

    /// Record an `over` report. Ignored for non-participants and
    /// duplicates; the first arrival fixes the finish order.
    pub fn record_over(&mut self, id: &str, score: u32) {
        if self.phase != RoundPhase::Active {
            return;
        }
        if !self.participants.iter().any(|p| p == id) {
            return;
        }
        if self.finished.iter().any(|f| f == id) {
            return;
        }
        self.finished.push(id.to_string());
        self.scores.insert(id.to_string(), score);
    }

    /// Update a participant's last known score from telemetry. Used as a
    /// fallback ranking for participants that never report `over`.
    pub fn record_score(&mut self, id: &str, score: u32) {
        if self.phase == RoundPhase::Active && self.participants.iter().any(|p| p == id) {
            self.scores.insert(id.to_string(), score);
        }
    }

    /// True when every participant has reported `over`.
    pub fn all_finished(&self) -> bool {
        !self.participants.is_empty() && self.finished.len() == self.participants.len()
    }

    /// Claim the single finalize pass for this round.
    ///
    /// Returns true exactly once per round id, so a racing last-finisher
    /// event and timeout can never both finalize.
    pub fn take_finalize(&mut self) -> bool {
        if self.phase != RoundPhase::Active || self.finalized {
            return false;
        }
        self.finalized = true;
        self.phase = RoundPhase::Finalizing;
        true
    }

    /// Rank the participants: score descending, ties broken by ascending
    /// finish order. Participants that never reported rank last among the
    /// unfinished, in registration order.
    pub fn compute_placements(&self, name_of: impl Fn(&str) -> Option<String>) -> Vec<Placement> {
        let mut ranked: Vec<(usize, &ConnId)> = self.participants.iter().enumerate().collect();

        let finish_pos = |id: &str, reg_idx: usize| -> usize {
            self.finished
                .iter()
                .position(|f| f == id)
                .unwrap_or(self.finished.len() + reg_idx)
        };

        ranked.sort_by(|(ai, a), (bi, b)| {
            let score_a = self.scores.get(*a).copied().unwrap_or(0);
            let score_b = self.scores.get(*b).copied().unwrap_or(0);
            score_b
                .cmp(&score_a)
                .then_with(|| finish_pos(a, *ai).cmp(&finish_pos(b, *bi)))
        });

        ranked
            .into_iter()
            .enumerate()
            .map(|(i, (_, id))| Placement {
                id: id.clone(),
                name: name_of(id),
                place: (i + 1) as u32,
                score: self.scores.get(id).copied().unwrap_or(0),
            })
            .collect()
    }
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}
