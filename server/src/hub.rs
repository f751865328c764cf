//! Central event loop: session membership and broadcast fan-out.
//!
//! The [`Hub`] is the only writer of the session table. It serializes three
//! kinds of events on one task (registration, unregistration, broadcast), so
//! membership changes never race with each other or with a fan-out. Anyone may
//! *read* the table through a [`HubHandle`], e.g. for direct peer delivery.

use crate::config::HubConfig;
use crate::registry::Registry;
use crate::session::Session;
use crate::state::StateHandler;
use log::{debug, info, warn};
use shared::{Envelope, Packet, SessionId};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

pub type SessionTable = Registry<Arc<Session>>;

/// A session waiting for an id, with the state it starts in.
pub struct Registration {
    pub session: Arc<Session>,
    pub entry: Option<Box<dyn StateHandler>>,
}

#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub sender: SessionId,
    pub packet: Packet,
    /// `None` means every registered session except the sender
    pub recipients: Option<Vec<SessionId>>,
}

/// Cloneable front door to the hub.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<Registration>,
    unregister_tx: mpsc::UnboundedSender<SessionId>,
    broadcast_tx: mpsc::Sender<BroadcastRequest>,
    sessions: Arc<SessionTable>,
}

impl HubHandle {
    /// Queues a new session for registration; false if the hub has stopped.
    pub fn register(&self, session: Arc<Session>, entry: Box<dyn StateHandler>) -> bool {
        let registration = Registration {
            session,
            entry: Some(entry),
        };
        match self.register_tx.send(registration) {
            Ok(()) => true,
            Err(e) => {
                warn!("Hub stopped, cannot register session from {}", e.0.session.peer());
                false
            }
        }
    }

    pub fn unregister(&self, id: SessionId) {
        if self.unregister_tx.send(id).is_err() {
            debug!("Hub stopped, session {} not unregistered", id);
        }
    }

    /// Queues a broadcast; drops it when the hub is saturated.
    pub fn broadcast(
        &self,
        sender: SessionId,
        packet: Packet,
        recipients: Option<Vec<SessionId>>,
    ) -> bool {
        let request = BroadcastRequest {
            sender,
            packet,
            recipients,
        };
        match self.broadcast_tx.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(request)) => {
                warn!(
                    "Hub broadcast queue full, dropping {} from {}",
                    request.packet.kind(),
                    request.sender
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Read access to the session table.
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id)
    }
}

pub struct Hub {
    sessions: Arc<SessionTable>,
    register_rx: mpsc::UnboundedReceiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<SessionId>,
    broadcast_rx: mpsc::Receiver<BroadcastRequest>,
}

impl Hub {
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let sessions = Arc::new(SessionTable::new());
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity.max(1));

        let hub = Self {
            sessions: Arc::clone(&sessions),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            sessions,
        };
        (hub, handle)
    }

    /// Creates a hub and runs its loop on a new task.
    pub fn spawn(config: &HubConfig) -> HubHandle {
        let (hub, handle) = Self::new(config);
        tokio::spawn(hub.run());
        handle
    }

    /// Runs until every handle has been dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        loop {
            tokio::select! {
                Some(registration) = self.register_rx.recv() => self.register(registration),
                Some(id) = self.unregister_rx.recv() => self.unregister(id),
                Some(request) = self.broadcast_rx.recv() => self.broadcast(request),
                else => break,
            }
        }

        info!("Hub stopped");
    }

    fn register(&self, registration: Registration) {
        let Registration { session, entry } = registration;

        // The id is stamped and the identity notice queued before the session
        // becomes visible to anyone else.
        let id = self.sessions.reserve_id();
        if !session.initialize(id, entry) {
            debug!("Dropping registration {} from {}", id, session.peer());
            return;
        }
        self.sessions.insert(Arc::clone(&session), Some(id));

        info!(
            "Session {} registered from {} ({} online)",
            id,
            session.peer(),
            self.sessions.len()
        );
    }

    fn unregister(&self, id: SessionId) {
        if self.sessions.remove(id) {
            info!("Session {} unregistered ({} online)", id, self.sessions.len());
        } else {
            debug!("Session {} was not registered", id);
        }
    }

    fn broadcast(&self, request: BroadcastRequest) {
        let BroadcastRequest {
            sender,
            packet,
            recipients,
        } = request;
        let envelope = Envelope::new(sender, packet);

        match recipients {
            None => {
                let mut delivered = 0;
                self.sessions.for_each(|id, session| {
                    if id != sender && session.deliver(envelope.clone()) {
                        delivered += 1;
                    }
                });
                debug!(
                    "Broadcast {} from {} to {} sessions",
                    envelope.packet.kind(),
                    sender,
                    delivered
                );
            }
            Some(mut ids) => {
                ids.sort_unstable();
                ids.dedup();
                for id in ids.into_iter().filter(|id| *id != sender) {
                    match self.sessions.get(id) {
                        Some(session) => {
                            session.deliver(envelope.clone());
                        }
                        None => debug!("Broadcast target {} not registered", id),
                    }
                }
            }
        }
    }
}
