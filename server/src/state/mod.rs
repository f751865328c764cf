//! Per-session behavior.
//!
//! A session always runs exactly one [`StateHandler`]. The session drives the
//! handler through its lifecycle: `bind` and `on_enter` once when it becomes
//! active, `handle_message` for every inbound envelope, `on_exit` once when
//! it is replaced or the session closes.
//!
//! Handlers never call [`Session::set_state`] from inside a hook. Instead
//! `handle_message` returns a [`Transition`] and the session applies it once
//! the hook has returned, on the session's own task.

mod admin;
mod connected;
mod in_game;
mod npc;

pub use admin::AdminState;
pub use connected::ConnectedState;
pub use in_game::InGameState;
pub use npc::NpcState;

use crate::session::Session;
use shared::{Envelope, Packet, SessionId};
use std::fmt;
use std::sync::Arc;

pub trait StateHandler: Send {
    /// Diagnostic name used in logs.
    fn name(&self) -> &'static str;

    /// Hands the handler its owning session before `on_enter`.
    fn bind(&mut self, session: Arc<Session>);

    fn on_enter(&mut self) {}

    /// Processes one envelope. `sender` is the session that produced it: the
    /// bound session itself for frames from its own client, a peer otherwise.
    ///
    /// Unknown or out-of-place packets are ignored, never an error.
    fn handle_message(&mut self, sender: SessionId, envelope: &Envelope) -> Transition;

    fn on_exit(&mut self) {}

    /// Whether this state passes peer whispers on to its client.
    fn accepts_whispers(&self) -> bool {
        false
    }
}

/// What the session should do after a handler has processed a message.
pub enum Transition {
    Stay,
    Switch(Box<dyn StateHandler>),
    Close(String),
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Stay => write!(f, "Stay"),
            Transition::Switch(next) => write!(f, "Switch({})", next.name()),
            Transition::Close(reason) => write!(f, "Close({})", reason),
        }
    }
}

/// A kick is only honoured when another session delivered it.
fn kick_reason(own_id: SessionId, sender: SessionId, packet: &Packet) -> Option<String> {
    match packet {
        Packet::Kick { target, reason } if sender != own_id && *target == own_id => {
            Some(format!("kicked by {}: {}", sender, reason))
        }
        _ => None,
    }
}
