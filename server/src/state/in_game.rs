//! Logged-in player state
//!
//! Entering spawns an actor for the session, sends the client the current
//! roster and announces the newcomer to everyone else. While active, the state:
//! - Broadcasts chat and routes whispers to sessions that listen for them
//! - Moves the actor and reports the move to every session in the region
//! - Answers `Look` with a description of the tile
//! - Relays what peers say and do to the client, signed with the peer's id
//!
//! Leaving (logout, kick, disconnect) despawns the actor and announces
//! `PlayerLeft` exactly once.

use super::{kick_reason, ConnectedState, StateHandler, Transition};
use crate::session::Session;
use crate::world::{ActorId, ActorKind, MoveOutcome, World};
use log::debug;
use shared::{Envelope, Packet, RegionId, SessionId};
use std::sync::Arc;

/// A logged-in player with an actor in the world.
pub struct InGameState {
    world: Arc<World>,
    name: String,
    session: Option<Arc<Session>>,
    actor: Option<(ActorId, RegionId)>,
}

impl InGameState {
    /// Creates the state for a player who logged in as `name`
    ///
    /// Nothing touches the world until the session enters the state.
    pub fn new(world: Arc<World>, name: &str) -> Self {
        Self {
            world,
            name: name.to_string(),
            session: None,
            actor: None,
        }
    }

    /// Forwards what other sessions said or did to this client.
    fn relay(session: &Session, sender: SessionId, packet: &Packet) {
        match packet {
            Packet::Chat { .. }
            | Packet::Whisper { .. }
            | Packet::Notice { .. }
            | Packet::PlayerJoined { .. }
            | Packet::PlayerMoved { .. }
            | Packet::PlayerLeft { .. } => {
                session.send_as(packet.clone(), sender);
            }
            _ => {}
        }
    }

    /// Applies one `Move` request to the player's actor.
    fn step(&self, session: &Session, dx: i32, dy: i32) {
        let Some((actor_id, region)) = self.actor else {
            return;
        };
        match self.world.move_actor(actor_id, dx, dy) {
            MoveOutcome::Moved(position) => {
                let moved = Packet::PlayerMoved {
                    id: session.id(),
                    region,
                    position,
                };
                session.send_as_self(moved.clone());
                session.broadcast(moved, Some(self.world.sessions_in_region(region)));
            }
            MoveOutcome::Blocked(position) => {
                session.send_as_self(Packet::MoveRejected { position });
            }
            MoveOutcome::Missing => {}
        }
    }
}

impl StateHandler for InGameState {
    fn name(&self) -> &'static str {
        "in_game"
    }

    fn bind(&mut self, session: Arc<Session>) {
        self.session = Some(session);
    }

    fn on_enter(&mut self) {
        let Some(session) = &self.session else {
            return;
        };

        let Some((actor_id, actor)) =
            self.world
                .spawn_actor(session.id(), &self.name, ActorKind::Player)
        else {
            session.send_as_self(Packet::Notice {
                text: "The world is full, try again later.".to_string(),
            });
            return;
        };
        self.actor = Some((actor_id, actor.region));

        for (_, other) in self.world.roster() {
            if other.session_id == session.id() {
                continue;
            }
            session.send_as(
                Packet::PlayerJoined {
                    id: other.session_id,
                    name: other.name,
                    region: other.region,
                    position: other.position,
                },
                other.session_id,
            );
        }

        let joined = Packet::PlayerJoined {
            id: session.id(),
            name: actor.name,
            region: actor.region,
            position: actor.position,
        };
        session.send_as_self(joined.clone());
        session.broadcast(joined, None);
    }

    fn handle_message(&mut self, sender: SessionId, envelope: &Envelope) -> Transition {
        let Some(session) = self.session.clone() else {
            return Transition::Stay;
        };
        let own_id = session.id();
        if let Some(reason) = kick_reason(own_id, sender, &envelope.packet) {
            return Transition::Close(reason);
        }
        if sender != own_id {
            Self::relay(&session, sender, &envelope.packet);
            return Transition::Stay;
        }

        match &envelope.packet {
            Packet::Chat { text } if !text.trim().is_empty() => {
                session.broadcast(Packet::Chat { text: text.clone() }, None);
            }
            Packet::Whisper { to, .. } if *to == own_id => {
                session.send_as_self(Packet::Notice {
                    text: "You cannot whisper to yourself.".to_string(),
                });
            }
            Packet::Whisper { to, text } => {
                let whisper = Packet::Whisper {
                    to: *to,
                    text: text.clone(),
                };
                let listening = session
                    .hub()
                    .session(*to)
                    .map_or(false, |peer| peer.accepts_whispers());
                if !listening || !session.send_to_peer(whisper, *to) {
                    session.send_as_self(Packet::Notice {
                        text: format!("Session {} is not online.", to),
                    });
                }
            }
            Packet::Move { dx, dy } => self.step(&session, *dx, *dy),
            Packet::Look { position } => {
                if let Some((_, region)) = self.actor {
                    session.send_as_self(Packet::Description {
                        position: *position,
                        text: self.world.describe(region, *position),
                    });
                }
            }
            Packet::Logout => {
                return Transition::Switch(Box::new(ConnectedState::new(Arc::clone(&self.world))));
            }
            other => debug!("Session {} ignored {} in game", own_id, other.kind()),
        }
        Transition::Stay
    }

    fn accepts_whispers(&self) -> bool {
        true
    }

    fn on_exit(&mut self) {
        let Some((actor_id, _)) = self.actor.take() else {
            return;
        };
        self.world.despawn_actor(actor_id);
        if let Some(session) = &self.session {
            session.broadcast(Packet::PlayerLeft { id: session.id() }, None);
        }
    }
}
