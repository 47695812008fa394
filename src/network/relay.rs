//! Message Relay / Protocol Router
//!
//! Stateless router keyed by message type. Owns the injected registry and
//! leaderboard; every frame is handled to completion before the next one,
//! so no locking guards room state. Timer wishes are returned as
//! [`Schedule`] values and armed by the IO layer, which feeds the expiry
//! back through [`Relay::handle_deadline`].

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::room::{Room, RoomRegistry};
use crate::network::rounds::RoundPhase;
use crate::scores::{Leaderboard, ScoreEntry};
use crate::{COUNTDOWN, MIN_READY_TO_START, ROUND_TIMEOUT};

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineKind {
    /// Countdown expired; snapshot participants and go active.
    CountdownOver,
    /// Bounded round timeout; finalize whatever has been reported.
    RoundTimeout,
}

/// A timer the IO layer must arm. Stamped with the round id so a deadline
/// from an abandoned round is ignored on arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    /// Room key the deadline belongs to.
    pub room: String,
    /// Round the deadline was armed for.
    pub round_id: u64,
    /// What to do on expiry.
    pub kind: DeadlineKind,
    /// Delay before firing.
    pub after: Duration,
}

/// The protocol router.
pub struct Relay {
    registry: RoomRegistry,
    leaderboard: Box<dyn Leaderboard>,
}

impl Relay {
    /// Router over a fresh registry.
    pub fn new(leaderboard: Box<dyn Leaderboard>) -> Self {
        Self {
            registry: RoomRegistry::new(),
            leaderboard,
        }
    }

    /// Read access to the registry, for inspection.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Route one inbound frame. `sender` is the connection's outbound
    /// channel, needed for replies that precede room membership.
    pub fn handle_frame(
        &mut self,
        conn: &str,
        sender: &mpsc::UnboundedSender<ServerMessage>,
        msg: ClientMessage,
    ) -> Vec<Schedule> {
        match msg {
            ClientMessage::Hello {
                room,
                client_id,
                create,
            } => self.on_hello(conn, sender, &room, client_id.as_deref(), create),
            ClientMessage::List => {
                let _ = sender.send(ServerMessage::Rooms {
                    items: self.registry.directory(),
                });
                Vec::new()
            }
            // Everything below requires established membership; frames from
            // strangers are dropped silently.
            other => match self.registry.room_of(conn) {
                Some(_) => self.on_member_frame(conn, other),
                None => {
                    debug!(conn, "frame from non-member dropped");
                    Vec::new()
                }
            },
        }
    }

    /// Connection closed: remove the client, re-arbitrate, announce.
    pub fn handle_disconnect(&mut self, conn: &str) -> Vec<Schedule> {
        let Some(key) = self.registry.leave(conn) else {
            return Vec::new();
        };
        info!(conn, room = %key, "client left");

        if let Some(room) = self.registry.get_mut(&key) {
            // Composition changed: any in-flight round is abandoned
            room.round.reset();
            if let Some(new_host) = room.arbitrate_host(None) {
                info!(room = %key, host = %new_host, "host reassigned");
                room.broadcast(&ServerMessage::Host { host_id: new_host }, None);
            }
            let count = room.count();
            room.broadcast(&ServerMessage::Presence { count }, None);
        }
        Vec::new()
    }

    /// A deadline armed from an earlier `Schedule` fired.
    pub fn handle_deadline(&mut self, room_key: &str, round_id: u64, kind: DeadlineKind) -> Vec<Schedule> {
        let Some(room) = self.registry.get_mut(room_key) else {
            return Vec::new();
        };
        if room.round.round_id != round_id {
            // Stale timer from an abandoned round
            return Vec::new();
        }

        match kind {
            DeadlineKind::CountdownOver => {
                if room.round.phase != RoundPhase::Countdown {
                    return Vec::new();
                }
                let participants = room.ready_clients();
                room.clear_ready();
                if participants.is_empty() {
                    room.round.reset();
                    return Vec::new();
                }
                info!(room = %room_key, round = round_id, players = participants.len(), "round active");
                room.round.begin_active(participants);
                vec![Schedule {
                    room: room_key.to_string(),
                    round_id,
                    kind: DeadlineKind::RoundTimeout,
                    after: ROUND_TIMEOUT,
                }]
            }
            DeadlineKind::RoundTimeout => {
                self.finalize_round(room_key);
                Vec::new()
            }
        }
    }

    fn on_hello(
        &mut self,
        conn: &str,
        sender: &mpsc::UnboundedSender<ServerMessage>,
        room_key: &str,
        token: Option<&str>,
        create: bool,
    ) -> Vec<Schedule> {
        if self.registry.room_of(conn).is_some() {
            debug!(conn, "duplicate hello dropped");
            return Vec::new();
        }
        if !create && !self.registry.contains(room_key) {
            let _ = sender.send(ServerMessage::Error {
                code: ErrorCode::RoomNotFound,
                message: Some(format!("room {room_key} does not exist")),
            });
            return Vec::new();
        }

        let room = self.registry.join(room_key, conn.to_string());
        let visitor = room.insert_client(conn.to_string(), token, sender.clone());
        room.round.reset();
        info!(conn, room = %room_key, visitor, create, "client joined");

        room.send_to(
            conn,
            ServerMessage::Welcome {
                id: conn.to_string(),
                visitor: Some(visitor),
            },
        );

        let force = create.then_some(conn);
        if let Some(new_host) = room.arbitrate_host(force) {
            room.broadcast(&ServerMessage::Host { host_id: new_host }, None);
        } else if let Some(host_id) = room.host_id.clone() {
            // Newcomer still learns the standing host
            room.send_to(conn, ServerMessage::Host { host_id });
        }

        let count = room.count();
        room.broadcast(&ServerMessage::Presence { count }, None);
        room.send_to(
            conn,
            ServerMessage::Settings {
                settings: room.settings,
            },
        );
        Vec::new()
    }

    /// Frames that require membership. Caller has already verified it.
    fn on_member_frame(&mut self, conn: &str, msg: ClientMessage) -> Vec<Schedule> {
        let room = self
            .registry
            .room_of(conn)
            .expect("membership checked by caller");
        let room_key = room.key.clone();

        match msg {
            ClientMessage::Settings { settings } => {
                // Host-only and frozen mid-round; violations are silent
                if !room.is_host(conn) || room.round.phase != RoundPhase::Idle {
                    return Vec::new();
                }
                room.settings = settings.sanitized();
                let effective = room.settings;
                room.broadcast(&ServerMessage::Settings { settings: effective }, None);
                Vec::new()
            }
            ClientMessage::Restart => {
                if !room.is_host(conn) || room.round.phase != RoundPhase::Idle {
                    return Vec::new();
                }
                vec![Self::start_countdown(room)]
            }
            ClientMessage::Ready => {
                // Accepted while idle or counting down; the participant set
                // is sampled at countdown expiry
                if !matches!(room.round.phase, RoundPhase::Idle | RoundPhase::Countdown) {
                    return Vec::new();
                }
                let already_counting = room.round.phase == RoundPhase::Countdown;
                if let Some(client) = room.clients.get_mut(conn) {
                    client.ready = true;
                }
                room.broadcast(
                    &ServerMessage::Ready {
                        from: conn.to_string(),
                    },
                    Some(conn),
                );
                if !already_counting && room.ready_clients().len() >= MIN_READY_TO_START {
                    return vec![Self::start_countdown(room)];
                }
                Vec::new()
            }
            ClientMessage::Name { name } => {
                if let Some(client) = room.clients.get_mut(conn) {
                    client.name = Some(name.clone());
                }
                room.broadcast(
                    &ServerMessage::Name {
                        from: conn.to_string(),
                        name,
                    },
                    Some(conn),
                );
                Vec::new()
            }
            ClientMessage::Preview { body, score } => {
                room.broadcast(
                    &ServerMessage::Preview {
                        from: conn.to_string(),
                        body,
                        score,
                    },
                    Some(conn),
                );
                Vec::new()
            }
            ClientMessage::Tick { score, ticks } => {
                room.round.record_score(conn, score);
                room.broadcast(
                    &ServerMessage::Tick {
                        from: conn.to_string(),
                        score,
                        ticks,
                    },
                    Some(conn),
                );
                Vec::new()
            }
            ClientMessage::Over { score } => {
                room.round.record_over(conn, score);
                room.broadcast(
                    &ServerMessage::Over {
                        from: conn.to_string(),
                        score,
                    },
                    Some(conn),
                );
                if room.round.all_finished() {
                    self.finalize_round(&room_key);
                }
                Vec::new()
            }
            ClientMessage::RoomMeta { name, public } => {
                if let Some(n) = name {
                    room.meta_name = Some(n);
                }
                if let Some(p) = public {
                    room.public = p;
                }
                Vec::new()
            }
            // hello/list never reach here
            ClientMessage::Hello { .. } | ClientMessage::List => Vec::new(),
        }
    }

    /// Mint a fresh seed and round id, broadcast them, and ask for the
    /// countdown deadline. The seed broadcast is the single point where
    /// all peers' simulations re-synchronize.
    fn start_countdown(room: &mut Room) -> Schedule {
        let seed: u32 = rand::random();
        room.seed = seed;
        let round_id = room.round.begin_countdown();
        info!(room = %room.key, round = round_id, seed, "countdown started");

        room.broadcast(
            &ServerMessage::Seed {
                seed,
                settings: room.settings,
                round_id: Some(round_id),
            },
            None,
        );
        Schedule {
            room: room.key.clone(),
            round_id,
            kind: DeadlineKind::CountdownOver,
            after: COUNTDOWN,
        }
    }

    /// Run the single finalize pass for the room's current round: compute
    /// placements, broadcast them, submit scores, return to idle.
    fn finalize_round(&mut self, room_key: &str) {
        let Some(room) = self.registry.get_mut(room_key) else {
            return;
        };
        if !room.round.take_finalize() {
            return;
        }

        let placements = room
            .round
            .compute_placements(|id| room.clients.get(id).and_then(|c| c.name.clone()));
        let round_id = room.round.round_id;
        info!(room = %room_key, round = round_id, "round finalized");

        room.broadcast(
            &ServerMessage::Results {
                round_id,
                placements: placements.clone(),
            },
            None,
        );

        let entries: Vec<ScoreEntry> = placements
            .iter()
            .map(|p| ScoreEntry {
                name: p.name.clone().unwrap_or_else(|| p.id.clone()),
                score: p.score,
            })
            .collect();
        self.leaderboard.submit(room_key, &entries);

        if let Some(room) = self.registry.get_mut(room_key) {
            room.round.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::settings::Settings;
    use crate::network::rounds::RoundPhase;
    use crate::scores::NoopLeaderboard;

    type Rx = mpsc::UnboundedReceiver<ServerMessage>;

    fn relay() -> Relay {
        Relay::new(Box::new(NoopLeaderboard))
    }

    fn join(relay: &mut Relay, conn: &str, room: &str, create: bool) -> Rx {
        let (tx, rx) = mpsc::unbounded_channel();
        relay.handle_frame(
            conn,
            &tx,
            ClientMessage::Hello {
                room: room.into(),
                client_id: None,
                create,
            },
        );
        rx
    }

    fn drain(rx: &mut Rx) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    #[test]
    fn test_join_nonexistent_room_errors() {
        let mut r = relay();
        let mut rx = join(&mut r, "a", "nope", false);
        let msgs = drain(&mut rx);
        assert!(matches!(
            msgs.as_slice(),
            [ServerMessage::Error {
                code: ErrorCode::RoomNotFound,
                ..
            }]
        ));
        assert!(r.registry().is_empty());
    }

    #[test]
    fn test_join_sends_welcome_host_presence_settings() {
        let mut r = relay();
        let mut rx = join(&mut r, "a", "lobby", true);
        let msgs = drain(&mut rx);

        assert!(msgs.iter().any(|m| matches!(m, ServerMessage::Welcome { id, visitor: Some(1) } if id == "a")));
        assert!(msgs.iter().any(|m| matches!(m, ServerMessage::Host { host_id } if host_id == "a")));
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::Presence { count: 1 })));
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::Settings { .. })));
    }

    #[test]
    fn test_frames_before_hello_are_dropped() {
        let mut r = relay();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let schedules = r.handle_frame("stranger", &tx, ClientMessage::Ready);
        assert!(schedules.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_non_host_settings_ignored() {
        let mut r = relay();
        let _rx_a = join(&mut r, "a", "lobby", true);
        let mut rx_b = join(&mut r, "b", "lobby", false);
        drain(&mut rx_b);

        let before = {
            let mut reg_room = None;
            if let Some(room) = r.registry.get_mut("lobby") {
                reg_room = Some(room.settings);
            }
            reg_room.unwrap()
        };

        let (tx_b, _) = mpsc::unbounded_channel();
        r.handle_frame(
            "b",
            &tx_b,
            ClientMessage::Settings {
                settings: Settings {
                    grid_size: 44,
                    ..Default::default()
                },
            },
        );

        let room = r.registry.get_mut("lobby").unwrap();
        assert_eq!(room.settings, before);
        // No settings broadcast either
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_host_settings_broadcast_and_sanitized() {
        let mut r = relay();
        let mut rx_a = join(&mut r, "a", "lobby", true);
        drain(&mut rx_a);

        let (tx_a, _) = mpsc::unbounded_channel();
        r.handle_frame(
            "a",
            &tx_a,
            ClientMessage::Settings {
                settings: Settings {
                    apple_count: 9,
                    ..Default::default()
                },
            },
        );

        let msgs = drain(&mut rx_a);
        assert!(msgs.iter().any(
            |m| matches!(m, ServerMessage::Settings { settings } if settings.apple_count == 4)
        ));
    }

    #[test]
    fn test_two_ready_starts_countdown_and_seed() {
        let mut r = relay();
        let mut rx_a = join(&mut r, "a", "lobby", true);
        let mut rx_b = join(&mut r, "b", "lobby", false);
        drain(&mut rx_a);
        drain(&mut rx_b);

        let (tx, _) = mpsc::unbounded_channel();
        let s1 = r.handle_frame("a", &tx, ClientMessage::Ready);
        assert!(s1.is_empty());

        let s2 = r.handle_frame("b", &tx, ClientMessage::Ready);
        assert_eq!(s2.len(), 1);
        assert_eq!(s2[0].kind, DeadlineKind::CountdownOver);
        let round_id = s2[0].round_id;

        // Seed broadcast reaches both peers
        for rx in [&mut rx_a, &mut rx_b] {
            let msgs = drain(rx);
            assert!(msgs.iter().any(
                |m| matches!(m, ServerMessage::Seed { round_id: Some(id), .. } if *id == round_id)
            ));
        }

        // Countdown expiry snapshots participants and clears ready flags
        let s3 = r.handle_deadline("lobby", round_id, DeadlineKind::CountdownOver);
        assert_eq!(s3.len(), 1);
        assert_eq!(s3[0].kind, DeadlineKind::RoundTimeout);

        let room = r.registry.get_mut("lobby").unwrap();
        assert_eq!(room.round.phase, RoundPhase::Active);
        assert_eq!(room.round.participants.len(), 2);
        assert!(room.clients.values().all(|c| !c.ready));
    }

    #[test]
    fn test_round_completes_when_all_report_over() {
        let mut r = relay();
        let mut rx_a = join(&mut r, "a", "lobby", true);
        let mut rx_b = join(&mut r, "b", "lobby", false);

        let (tx, _) = mpsc::unbounded_channel();
        r.handle_frame("a", &tx, ClientMessage::Ready);
        let s = r.handle_frame("b", &tx, ClientMessage::Ready);
        let round_id = s[0].round_id;
        r.handle_deadline("lobby", round_id, DeadlineKind::CountdownOver);
        drain(&mut rx_a);
        drain(&mut rx_b);

        r.handle_frame("a", &tx, ClientMessage::Over { score: 2 });
        r.handle_frame("b", &tx, ClientMessage::Over { score: 5 });

        let msgs = drain(&mut rx_a);
        let results = msgs
            .iter()
            .find_map(|m| match m {
                ServerMessage::Results { placements, .. } => Some(placements.clone()),
                _ => None,
            })
            .expect("results broadcast");
        assert_eq!(results[0].id, "b");
        assert_eq!(results[0].score, 5);
        assert_eq!(results[1].id, "a");

        // Back to idle, and the late timeout is a no-op
        let room = r.registry.get_mut("lobby").unwrap();
        assert_eq!(room.round.phase, RoundPhase::Idle);
        r.handle_deadline("lobby", round_id, DeadlineKind::RoundTimeout);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_timeout_finalizes_with_unfinished_last() {
        let mut r = relay();
        let mut rx_a = join(&mut r, "a", "lobby", true);
        let _rx_b = join(&mut r, "b", "lobby", false);

        let (tx, _) = mpsc::unbounded_channel();
        r.handle_frame("a", &tx, ClientMessage::Ready);
        let s = r.handle_frame("b", &tx, ClientMessage::Ready);
        let round_id = s[0].round_id;
        r.handle_deadline("lobby", round_id, DeadlineKind::CountdownOver);
        drain(&mut rx_a);

        // Only a reports; b goes silent until the timeout
        r.handle_frame("a", &tx, ClientMessage::Over { score: 0 });
        r.handle_deadline("lobby", round_id, DeadlineKind::RoundTimeout);

        let msgs = drain(&mut rx_a);
        let results = msgs
            .iter()
            .find_map(|m| match m {
                ServerMessage::Results { placements, .. } => Some(placements.clone()),
                _ => None,
            })
            .expect("results broadcast");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "b");
    }

    #[test]
    fn test_relay_restamps_and_skips_sender() {
        let mut r = relay();
        let mut rx_a = join(&mut r, "a", "lobby", true);
        let mut rx_b = join(&mut r, "b", "lobby", false);
        drain(&mut rx_a);
        drain(&mut rx_b);

        let (tx, _) = mpsc::unbounded_channel();
        r.handle_frame(
            "a",
            &tx,
            ClientMessage::Tick {
                score: 3,
                ticks: 40,
            },
        );

        // Sender gets no echo
        assert!(drain(&mut rx_a).is_empty());
        let msgs = drain(&mut rx_b);
        assert!(msgs.iter().any(
            |m| matches!(m, ServerMessage::Tick { from, score: 3, .. } if from == "a")
        ));
    }

    #[test]
    fn test_host_disconnect_promotes_next() {
        let mut r = relay();
        let mut rx_a = join(&mut r, "a", "lobby", true);
        let mut rx_b = join(&mut r, "b", "lobby", false);
        drain(&mut rx_a);
        drain(&mut rx_b);

        r.handle_disconnect("a");
        let msgs = drain(&mut rx_b);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::Host { host_id } if host_id == "b")));
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::Presence { count: 1 })));
    }

    #[test]
    fn test_disconnect_of_last_client_removes_room() {
        let mut r = relay();
        let _rx = join(&mut r, "a", "lobby", true);
        r.handle_disconnect("a");
        assert!(r.registry().is_empty());
    }

    #[test]
    fn test_restart_is_host_only_and_idle_only() {
        let mut r = relay();
        let _rx_a = join(&mut r, "a", "lobby", true);
        let _rx_b = join(&mut r, "b", "lobby", false);

        let (tx, _) = mpsc::unbounded_channel();
        // Non-host restart is silently ignored
        assert!(r.handle_frame("b", &tx, ClientMessage::Restart).is_empty());

        // Host restart starts a countdown
        let s = r.handle_frame("a", &tx, ClientMessage::Restart);
        assert_eq!(s.len(), 1);
        assert_eq!(s[0].kind, DeadlineKind::CountdownOver);

        // A second restart mid-countdown is ignored
        assert!(r.handle_frame("a", &tx, ClientMessage::Restart).is_empty());
    }

    #[test]
    fn test_stale_deadline_ignored_after_membership_change() {
        let mut r = relay();
        let _rx_a = join(&mut r, "a", "lobby", true);
        let _rx_b = join(&mut r, "b", "lobby", false);

        let (tx, _) = mpsc::unbounded_channel();
        r.handle_frame("a", &tx, ClientMessage::Ready);
        let s = r.handle_frame("b", &tx, ClientMessage::Ready);
        let round_id = s[0].round_id;

        // Join resets the round before the countdown expires
        let _rx_c = join(&mut r, "c", "lobby", false);
        let follow = r.handle_deadline("lobby", round_id, DeadlineKind::CountdownOver);
        assert!(follow.is_empty());
        let room = r.registry.get_mut("lobby").unwrap();
        assert_eq!(room.round.phase, RoundPhase::Idle);
    }

    #[test]
    fn test_list_works_without_membership() {
        let mut r = relay();
        let _rx_a = join(&mut r, "a", "lobby", true);
        let (tx_a, _) = mpsc::unbounded_channel();
        r.handle_frame(
            "a",
            &tx_a,
            ClientMessage::RoomMeta {
                name: Some("Lobby".into()),
                public: Some(true),
            },
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        r.handle_frame("stranger", &tx, ClientMessage::List);
        let msgs = drain(&mut rx);
        match &msgs[..] {
            [ServerMessage::Rooms { items }] => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].id, "lobby");
                assert_eq!(items[0].name.as_deref(), Some("Lobby"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
