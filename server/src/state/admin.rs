//! Administrator state
//!
//! Administrators have no actor in the world. They can:
//! - Run queries (`who`, `reload <region>` and whatever the store answers)
//! - Kick any other session by id
//! - Post notices to every session
//!
//! Peer chat, whispers and notices are relayed to the client like for players.

use super::{kick_reason, ConnectedState, StateHandler, Transition};
use crate::session::Session;
use crate::world::World;
use log::{debug, info};
use shared::{Envelope, Packet, SessionId};
use std::sync::Arc;

/// An administrator: runs queries, kicks sessions, posts notices. Has no
/// actor in the world.
pub struct AdminState {
    world: Arc<World>,
    name: String,
    session: Option<Arc<Session>>,
}

impl AdminState {
    /// Creates the state for an administrator logged in as `name`
    pub fn new(world: Arc<World>, name: &str) -> Self {
        Self {
            world,
            name: name.to_string(),
            session: None,
        }
    }

    /// Delivers a kick straight to the target and describes the outcome
    ///
    /// The kick bypasses the hub so it reaches the target even while the
    /// broadcast queue is saturated.
    fn kick(&self, session: &Session, target: SessionId, reason: &str) -> String {
        if target == session.id() {
            return "refusing to kick yourself".to_string();
        }
        let kick = Packet::Kick {
            target,
            reason: reason.to_string(),
        };
        if session.send_to_peer(kick, target) {
            info!("{} kicked session {}: {}", self.name, target, reason);
            format!("kicked session {}", target)
        } else {
            format!("session {} is not online", target)
        }
    }
}

impl StateHandler for AdminState {
    fn name(&self) -> &'static str {
        "admin"
    }

    fn bind(&mut self, session: Arc<Session>) {
        self.session = Some(session);
    }

    fn on_enter(&mut self) {
        if let Some(session) = &self.session {
            session.send_as_self(Packet::Notice {
                text: format!("Logged in as administrator {}.", self.name),
            });
        }
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
            if let Packet::Chat { .. } | Packet::Whisper { .. } | Packet::Notice { .. } =
                envelope.packet
            {
                session.send_as(envelope.packet.clone(), sender);
            }
            return Transition::Stay;
        }

        match &envelope.packet {
            Packet::AdminQuery { query } => {
                let output = match self.world.admin_query(query) {
                    Ok(output) => output,
                    Err(e) => format!("error: {}", e),
                };
                session.send_as_self(Packet::AdminResult { output });
            }
            Packet::Kick { target, reason } => {
                let output = self.kick(&session, *target, reason);
                session.send_as_self(Packet::AdminResult { output });
            }
            Packet::Notice { text } => {
                session.broadcast(Packet::Notice { text: text.clone() }, None);
            }
            Packet::Logout => {
                return Transition::Switch(Box::new(ConnectedState::new(Arc::clone(&self.world))));
            }
            other => debug!("Session {} ignored {} as admin", own_id, other.kind()),
        }
        Transition::Stay
    }

    fn accepts_whispers(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::hub::Hub;
    use crate::state::testing::{expect, join, login, test_world};

    fn query(text: &str) -> Envelope {
        Envelope::unsigned(Packet::AdminQuery {
            query: text.to_string(),
        })
    }

    #[tokio::test]
    async fn test_queries_return_results() {
        let hub = Hub::spawn(&HubConfig::default());
        let world = test_world();
        let (_admin, mut remote) = join(&hub, Box::new(ConnectedState::new(world.clone())));
        login(&mut remote, "admin", "admin").await;

        remote.push(query("accounts"));
        let result = expect(&mut remote, |e| matches!(e.packet, Packet::AdminResult { .. })).await;
        assert_eq!(
            result.packet,
            Packet::AdminResult {
                output: "admin".to_string()
            }
        );

        remote.push(query("nonsense"));
        let result = expect(&mut remote, |e| matches!(e.packet, Packet::AdminResult { .. })).await;
        assert!(matches!(result.packet, Packet::AdminResult { ref output } if output.starts_with("error:")));
    }

    #[tokio::test]
    async fn test_kick_closes_target() {
        let hub = Hub::spawn(&HubConfig::default());
        let world = test_world();
        let (_admin, mut admin_remote) = join(&hub, Box::new(ConnectedState::new(world.clone())));
        let admin_id = login(&mut admin_remote, "admin", "admin").await;
        let (player, mut player_remote) = join(&hub, Box::new(ConnectedState::new(world.clone())));
        let player_id = login(&mut player_remote, "ada", "pw").await;

        admin_remote.push(Envelope::unsigned(Packet::Kick {
            target: player_id,
            reason: "spam".to_string(),
        }));

        let bye = expect(&mut player_remote, |e| matches!(e.packet, Packet::Disconnected { .. })).await;
        assert_eq!(
            bye.packet,
            Packet::Disconnected {
                reason: format!("kicked by {}: spam", admin_id)
            }
        );
        assert!(player.is_closed());

        let result = expect(&mut admin_remote, |e| matches!(e.packet, Packet::AdminResult { .. })).await;
        assert_eq!(
            result.packet,
            Packet::AdminResult {
                output: format!("kicked session {}", player_id)
            }
        );
    }

    #[tokio::test]
    async fn test_player_cannot_kick() {
        let hub = Hub::spawn(&HubConfig::default());
        let world = test_world();
        let (a, mut remote_a) = join(&hub, Box::new(ConnectedState::new(world.clone())));
        login(&mut remote_a, "ada", "pw").await;
        let (b, mut remote_b) = join(&hub, Box::new(ConnectedState::new(world.clone())));
        let b_id = login(&mut remote_b, "bob", "pw").await;

        remote_a.push(Envelope::unsigned(Packet::Kick {
            target: b_id,
            reason: "mine".to_string(),
        }));
        remote_a.push(Envelope::unsigned(Packet::Look {
            position: shared::Point::new(0, 0),
        }));
        expect(&mut remote_a, |e| matches!(e.packet, Packet::Description { .. })).await;

        assert!(!a.is_closed());
        assert!(!b.is_closed());
    }

    #[tokio::test]
    async fn test_notice_reaches_everyone() {
        let hub = Hub::spawn(&HubConfig::default());
        let world = test_world();
        let (_admin, mut admin_remote) = join(&hub, Box::new(ConnectedState::new(world.clone())));
        let admin_id = login(&mut admin_remote, "admin", "admin").await;
        let (_player, mut player_remote) = join(&hub, Box::new(ConnectedState::new(world.clone())));
        login(&mut player_remote, "ada", "pw").await;

        admin_remote.push(Envelope::unsigned(Packet::Notice {
            text: "restart soon".to_string(),
        }));
        let notice = expect(&mut player_remote, |e| matches!(e.packet, Packet::Notice { .. })).await;
        assert_eq!(notice.sender_id, admin_id);
    }
}
