//! Client-side session state.
//!
//! `LocalSession` is a pure state machine: it consumes server messages and
//! local clock readings and exposes everything a frontend needs to render.
//! No IO lives here; the adapter feeds it and the frontend polls it, so
//! every transition is unit-testable with plain message values.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::game::settings::{Cell, Settings};
use crate::game::state::GameState;
use crate::game::tick::{tick, TickEvent, TickResult};
use crate::network::protocol::{ErrorCode, Placement, RoomInfo, ServerMessage};
use crate::COUNTDOWN;

/// Base interval between simulation ticks at score zero.
pub const TICK_BASE: Duration = Duration::from_millis(140);
/// Hard floor for the tick interval; the curve never goes below this.
pub const TICK_MIN: Duration = Duration::from_millis(60);
/// How much each point shaves off the interval.
pub const TICK_STEP: Duration = Duration::from_millis(4);

/// Interval between ticks for a given score. Speeds up linearly with the
/// score and bottoms out at [`TICK_MIN`].
pub fn tick_interval(score: u32) -> Duration {
    let shave = TICK_STEP.saturating_mul(score);
    TICK_BASE.saturating_sub(shave).max(TICK_MIN)
}

/// What the frontend should be showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Joined (or joining), waiting for a round.
    Lobby,
    /// Seed received, counting down to the synchronized start.
    Countdown,
    /// Local simulation running.
    Playing,
    /// Placements received, showing results until the next round.
    Results,
}

/// What we know about one remote peer, built up from relayed frames.
#[derive(Debug, Clone, Default)]
pub struct PeerView {
    /// Announced display name.
    pub name: Option<String>,
    /// Last spectator snapshot of their board.
    pub body: Vec<Cell>,
    /// Last reported score.
    pub score: u32,
    /// Last reported tick count.
    pub ticks: u32,
    /// Declared ready for the next round.
    pub ready: bool,
    /// Reported their round as over.
    pub over: bool,
}

/// Client-side mirror of the room, fed by [`ServerMessage`] values.
#[derive(Debug)]
pub struct LocalSession {
    /// Our connection id, from `welcome`.
    pub my_id: Option<String>,
    /// Our stable visitor number, from `welcome`.
    pub visitor: Option<u32>,
    /// Current host's connection id.
    pub host_id: Option<String>,
    /// Connected client count, including us.
    pub presence: usize,
    /// Effective room settings.
    pub settings: Settings,
    /// Round id of the pending or running round.
    pub round_id: Option<u64>,
    /// Remote peers by connection id.
    pub peers: HashMap<String, PeerView>,
    /// Our own board; rebuilt from the seed on every round start.
    pub engine: Option<GameState>,
    /// Placements of the last finalized round.
    pub results: Option<Vec<Placement>>,
    /// Last room directory snapshot.
    pub rooms: Vec<RoomInfo>,
    /// Last application error, kept for the frontend to surface.
    pub last_error: Option<(ErrorCode, Option<String>)>,
    phase: SessionPhase,
    epoch: u64,
    countdown_deadline: Option<Instant>,
    next_tick_at: Option<Instant>,
}

impl LocalSession {
    /// Fresh session, nothing known yet.
    pub fn new() -> Self {
        Self {
            my_id: None,
            visitor: None,
            host_id: None,
            presence: 0,
            settings: Settings::default(),
            round_id: None,
            peers: HashMap::new(),
            engine: None,
            results: None,
            rooms: Vec::new(),
            last_error: None,
            phase: SessionPhase::Lobby,
            epoch: 0,
            countdown_deadline: None,
            next_tick_at: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Reseed epoch. Bumped on every round start; async work captured
    /// before a reseed compares its epoch and bails when it lost the race.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// True when we hold the host slot.
    pub fn am_host(&self) -> bool {
        self.my_id.is_some() && self.my_id == self.host_id
    }

    /// Time left on the countdown, if one is running.
    pub fn countdown_remaining(&self, now: Instant) -> Option<Duration> {
        let deadline = self.countdown_deadline?;
        Some(deadline.saturating_duration_since(now))
    }

    /// Consume one server message, advancing the session.
    pub fn apply(&mut self, msg: ServerMessage, now: Instant) {
        match msg {
            ServerMessage::Welcome { id, visitor } => {
                self.my_id = Some(id);
                self.visitor = visitor;
            }
            ServerMessage::Presence { count } => {
                self.presence = count;
                // Composition changed: the server abandoned any pending
                // round, so drop back to lobby unless we are mid-round
                if self.phase == SessionPhase::Countdown {
                    self.abandon_round();
                }
            }
            ServerMessage::Host { host_id } => {
                self.host_id = Some(host_id);
            }
            ServerMessage::Settings { settings } => {
                self.settings = settings;
            }
            ServerMessage::Seed {
                seed,
                settings,
                round_id,
            } => {
                self.settings = settings;
                self.round_id = round_id;
                self.results = None;
                self.epoch += 1;
                self.engine = Some(GameState::new(seed, &self.settings));
                self.phase = SessionPhase::Countdown;
                // Wall-clock deadline: ticking starts when it passes, not
                // when a render frame happens to notice
                self.countdown_deadline = Some(now + COUNTDOWN);
                self.next_tick_at = None;
                for peer in self.peers.values_mut() {
                    peer.over = false;
                    peer.ready = false;
                    peer.score = 0;
                    peer.ticks = 0;
                }
            }
            ServerMessage::Ready { from } => {
                self.peers.entry(from).or_default().ready = true;
            }
            ServerMessage::Name { from, name } => {
                self.peers.entry(from).or_default().name = Some(name);
            }
            ServerMessage::Preview { from, body, score } => {
                let peer = self.peers.entry(from).or_default();
                peer.body = body;
                peer.score = score;
            }
            ServerMessage::Tick { from, score, ticks } => {
                let peer = self.peers.entry(from).or_default();
                peer.score = score;
                peer.ticks = ticks;
            }
            ServerMessage::Over { from, score } => {
                let peer = self.peers.entry(from).or_default();
                peer.over = true;
                peer.score = score;
            }
            ServerMessage::Rooms { items } => {
                self.rooms = items;
            }
            ServerMessage::Results {
                round_id,
                placements,
            } => {
                self.round_id = Some(round_id);
                self.results = Some(placements);
                self.phase = SessionPhase::Results;
                self.countdown_deadline = None;
                self.next_tick_at = None;
            }
            ServerMessage::Error { code, message } => {
                self.last_error = Some((code, message));
            }
        }
    }

    /// Advance the local clock. Flips countdown into play when the
    /// deadline passes and runs however many ticks are due. Returns the
    /// events from the ticks that ran.
    pub fn poll(&mut self, now: Instant) -> Vec<TickEvent> {
        if self.phase == SessionPhase::Countdown {
            if let Some(deadline) = self.countdown_deadline {
                if now >= deadline {
                    self.phase = SessionPhase::Playing;
                    self.countdown_deadline = None;
                    // First tick is one interval after the synchronized start
                    let score = self.engine.as_ref().map(|e| e.score).unwrap_or(0);
                    self.next_tick_at = Some(deadline + tick_interval(score));
                }
            }
        }

        let mut events = Vec::new();
        if self.phase != SessionPhase::Playing {
            return events;
        }

        while let (Some(due), Some(engine)) = (self.next_tick_at, self.engine.as_mut()) {
            if now < due || !engine.alive {
                break;
            }
            let TickResult { events: mut evs } = tick(engine, &self.settings);
            events.append(&mut evs);
            self.next_tick_at = Some(due + tick_interval(engine.score));
        }
        events
    }

    /// Our round is over locally (death or quit). Leaves the engine in
    /// place so the final board stays on screen.
    pub fn local_over(&mut self) {
        self.next_tick_at = None;
    }

    /// Final score to report with `over`.
    pub fn score(&self) -> u32 {
        self.engine.as_ref().map(|e| e.score).unwrap_or(0)
    }

    fn abandon_round(&mut self) {
        self.phase = SessionPhase::Lobby;
        self.countdown_deadline = None;
        self.next_tick_at = None;
        for peer in self.peers.values_mut() {
            peer.ready = false;
        }
    }
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new()
    }
}
