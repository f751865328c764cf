//! Pre-authentication state
//!
//! Every accepted connection starts here. The only thing a client can do is
//! send `Login`; the credentials are checked against the world store and the
//! session moves on to the state matching the account's role:
//! - `Role::Player` enters [`InGameState`] and gets an actor in the world
//! - `Role::Admin` enters [`AdminState`]
//!
//! Peers cannot reach a session in this state except to kick it.

use super::{kick_reason, AdminState, InGameState, StateHandler, Transition};
use crate::session::Session;
use crate::world::World;
use log::{debug, info};
use shared::{Envelope, Packet, Role, SessionId};
use std::sync::Arc;

/// Failed logins allowed before the session is closed.
pub const MAX_LOGIN_ATTEMPTS: u32 = 3;

/// Entry state of every accepted connection: waits for credentials.
pub struct ConnectedState {
    world: Arc<World>,
    session: Option<Arc<Session>>,
    failed_attempts: u32,
}

impl ConnectedState {
    /// Creates the entry state for a fresh connection
    ///
    /// Also used as the target of `Logout` from the in-game and admin states,
    /// which resets the failed-attempt counter.
    pub fn new(world: Arc<World>) -> Self {
        Self {
            world,
            session: None,
            failed_attempts: 0,
        }
    }

    /// Checks credentials and picks the next state
    ///
    /// A rejected attempt answers `LoginRejected`; the session is closed once
    /// [`MAX_LOGIN_ATTEMPTS`] attempts have failed.
    fn login(&mut self, session: &Session, name: &str, password: &str) -> Transition {
        match self.world.store().authenticate(name, password) {
            Some(role) => {
                info!("Session {} logged in as {} ({:?})", session.id(), name, role);
                session.send_as_self(Packet::LoginAccepted { role });
                let world = Arc::clone(&self.world);
                match role {
                    Role::Player => Transition::Switch(Box::new(InGameState::new(world, name))),
                    Role::Admin => Transition::Switch(Box::new(AdminState::new(world, name))),
                }
            }
            None => {
                self.failed_attempts += 1;
                debug!(
                    "Session {} failed login as {} ({} of {})",
                    session.id(),
                    name,
                    self.failed_attempts,
                    MAX_LOGIN_ATTEMPTS
                );
                session.send_as_self(Packet::LoginRejected {
                    reason: "invalid credentials".to_string(),
                });
                if self.failed_attempts >= MAX_LOGIN_ATTEMPTS {
                    Transition::Close("too many failed logins".to_string())
                } else {
                    Transition::Stay
                }
            }
        }
    }
}

impl StateHandler for ConnectedState {
    fn name(&self) -> &'static str {
        "connected"
    }

    fn bind(&mut self, session: Arc<Session>) {
        self.session = Some(session);
    }

    fn handle_message(&mut self, sender: SessionId, envelope: &Envelope) -> Transition {
        let Some(session) = self.session.clone() else {
            return Transition::Stay;
        };
        if let Some(reason) = kick_reason(session.id(), sender, &envelope.packet) {
            return Transition::Close(reason);
        }
        if sender != session.id() {
            return Transition::Stay;
        }

        match &envelope.packet {
            Packet::Login { name, password } => self.login(&session, name, password),
            _ => Transition::Stay,
        }
    }
}
