//! Server-driven wandering actors

use super::{kick_reason, StateHandler, Transition};
use crate::session::Session;
use crate::world::{ActorId, ActorKind, MoveOutcome, World};
use log::debug;
use rand::Rng;
use shared::{Envelope, Packet, RegionId, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A server-driven actor that wanders one random step per interval.
///
/// Runs on a session with an in-memory transport, so it is registered,
/// addressed and kicked exactly like a player.
pub struct NpcState {
    world: Arc<World>,
    name: String,
    step_interval: Duration,
    session: Option<Arc<Session>>,
    actor: Option<ActorId>,
    wander: Option<CancellationToken>,
}

impl NpcState {
    /// Creates an actor named `name` that takes a step every `step_interval`
    pub fn new(world: Arc<World>, name: &str, step_interval: Duration) -> Self {
        Self {
            world,
            name: name.to_string(),
            step_interval,
            session: None,
            actor: None,
            wander: None,
        }
    }

    /// Spawns the wander loop; it stops when the token is cancelled or the
    /// actor disappears from the world.
    fn start_wandering(&mut self, session: Arc<Session>, actor_id: ActorId, region: RegionId) {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let world = Arc::clone(&self.world);
        let interval = self.step_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let (dx, dy) = {
                            let mut rng = rand::thread_rng();
                            (rng.gen_range(-1..=1), rng.gen_range(-1..=1))
                        };
                        match world.move_actor(actor_id, dx, dy) {
                            MoveOutcome::Moved(position) => {
                                session.broadcast(
                                    Packet::PlayerMoved { id: session.id(), region, position },
                                    Some(world.sessions_in_region(region)),
                                );
                            }
                            MoveOutcome::Blocked(_) => {}
                            MoveOutcome::Missing => break,
                        }
                    }
                }
            }
            debug!("Actor {} stopped wandering", actor_id);
        });

        self.wander = Some(token);
    }
}

impl StateHandler for NpcState {
    fn name(&self) -> &'static str {
        "npc"
    }

    fn bind(&mut self, session: Arc<Session>) {
        self.session = Some(session);
    }

    fn on_enter(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let Some((actor_id, actor)) = self
            .world
            .spawn_actor(session.id(), &self.name, ActorKind::Npc)
        else {
            return;
        };
        self.actor = Some(actor_id);

        session.broadcast(
            Packet::PlayerJoined {
                id: session.id(),
                name: actor.name,
                region: actor.region,
                position: actor.position,
            },
            None,
        );
        self.start_wandering(session, actor_id, actor.region);
    }

    fn handle_message(&mut self, sender: SessionId, envelope: &Envelope) -> Transition {
        let own_id = self.session.as_ref().map(|s| s.id()).unwrap_or_default();
        match kick_reason(own_id, sender, &envelope.packet) {
            Some(reason) => Transition::Close(reason),
            None => Transition::Stay,
        }
    }

    fn on_exit(&mut self) {
        if let Some(token) = self.wander.take() {
            token.cancel();
        }
        if let Some(actor_id) = self.actor.take() {
            self.world.despawn_actor(actor_id);
            if let Some(session) = &self.session {
                session.broadcast(Packet::PlayerLeft { id: session.id() }, None);
            }
        }
    }
}
