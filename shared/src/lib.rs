use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod codec;

pub use codec::{EnvelopeCodec, TransportError};

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 8080;
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Sender id carried by frames that did not name a sender.
pub const UNSET_SENDER: SessionId = 0;

pub type SessionId = u64;
pub type RegionId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the point one step away, with each delta clamped to a single tile.
    pub fn step(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx.clamp(-1, 1)),
            y: self.y.saturating_add(dy.clamp(-1, 1)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Player,
    Admin,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Connection management
    Welcome {
        session_id: SessionId,
        protocol_version: u32,
    },
    Heartbeat {
        timestamp: u64,
    },
    Disconnected {
        reason: String,
    },

    // Authentication
    Login {
        name: String,
        password: String,
    },
    LoginAccepted {
        role: Role,
    },
    LoginRejected {
        reason: String,
    },
    Logout,

    // Messaging
    Chat {
        text: String,
    },
    Whisper {
        to: SessionId,
        text: String,
    },
    Notice {
        text: String,
    },

    // World
    Move {
        dx: i32,
        dy: i32,
    },
    MoveRejected {
        position: Point,
    },
    Look {
        position: Point,
    },
    Description {
        position: Point,
        text: String,
    },
    PlayerJoined {
        id: SessionId,
        name: String,
        region: RegionId,
        position: Point,
    },
    PlayerMoved {
        id: SessionId,
        region: RegionId,
        position: Point,
    },
    PlayerLeft {
        id: SessionId,
    },

    // Administration
    AdminQuery {
        query: String,
    },
    AdminResult {
        output: String,
    },
    Kick {
        target: SessionId,
        reason: String,
    },
}

impl Packet {
    /// Short name of the packet kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Welcome { .. } => "Welcome",
            Packet::Heartbeat { .. } => "Heartbeat",
            Packet::Disconnected { .. } => "Disconnected",
            Packet::Login { .. } => "Login",
            Packet::LoginAccepted { .. } => "LoginAccepted",
            Packet::LoginRejected { .. } => "LoginRejected",
            Packet::Logout => "Logout",
            Packet::Chat { .. } => "Chat",
            Packet::Whisper { .. } => "Whisper",
            Packet::Notice { .. } => "Notice",
            Packet::Move { .. } => "Move",
            Packet::MoveRejected { .. } => "MoveRejected",
            Packet::Look { .. } => "Look",
            Packet::Description { .. } => "Description",
            Packet::PlayerJoined { .. } => "PlayerJoined",
            Packet::PlayerMoved { .. } => "PlayerMoved",
            Packet::PlayerLeft { .. } => "PlayerLeft",
            Packet::AdminQuery { .. } => "AdminQuery",
            Packet::AdminResult { .. } => "AdminResult",
            Packet::Kick { .. } => "Kick",
        }
    }
}

/// One logical message on the wire: who sent it and what it says.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    pub sender_id: SessionId,
    pub packet: Packet,
}

impl Envelope {
    pub fn new(sender_id: SessionId, packet: Packet) -> Self {
        Self { sender_id, packet }
    }

    /// An envelope that leaves the sender for the receiving side to fill in.
    pub fn unsigned(packet: Packet) -> Self {
        Self {
            sender_id: UNSET_SENDER,
            packet,
        }
    }

    pub fn has_sender(&self) -> bool {
        self.sender_id != UNSET_SENDER
    }
}

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
