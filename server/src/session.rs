//! Connection-bound session actor.
//!
//! A session owns one transport connection, a bounded inbound queue, a
//! bounded outbound queue and the active [`StateHandler`]. Once initialized
//! by the hub it runs two tasks:
//!
//! - **Read pump**: pulls frames off the transport, stamps the session's own
//!   id on them and queues them inbound; drains the inbound queue (own frames
//!   plus peer deliveries) into the active handler. All state transitions of
//!   a session happen on this task.
//! - **Write pump**: drains the outbound queue into the transport.
//!
//! Both queues shed load instead of blocking: when one is full the newest
//! message is dropped and logged, so a slow peer can never stall the hub or
//! another session.

use crate::config::SessionConfig;
use crate::hub::HubHandle;
use crate::state::{StateHandler, Transition};
use crate::transport::{Connection, FrameSink, FrameStream};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{Envelope, Packet, SessionId, UNSET_SENDER, PROTOCOL_VERSION};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Used as the idle deadline when idle timeouts are disabled.
const NO_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport halves and queue receivers, held until the pumps start.
struct PendingIo {
    reader: FrameStream,
    writer: FrameSink,
    inbound_rx: mpsc::Receiver<Envelope>,
    outbound_rx: mpsc::Receiver<Envelope>,
}

pub struct Session {
    id: AtomicU64,
    peer: String,
    hub: HubHandle,
    config: SessionConfig,
    inbound_tx: mpsc::Sender<Envelope>,
    /// Dropping the sender is what stops the write pump
    outbound: Mutex<Option<mpsc::Sender<Envelope>>>,
    pending: Mutex<Option<PendingIo>>,
    state: Mutex<Option<Box<dyn StateHandler>>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    closed: AtomicBool,
    /// Mirrors the active handler, readable without its lock
    accepts_whispers: AtomicBool,
}

impl Session {
    pub fn new(connection: Connection, hub: HubHandle, config: SessionConfig) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));

        Arc::new(Self {
            id: AtomicU64::new(UNSET_SENDER),
            peer: connection.peer,
            hub,
            config,
            inbound_tx,
            outbound: Mutex::new(Some(outbound_tx)),
            pending: Mutex::new(Some(PendingIo {
                reader: connection.reader,
                writer: connection.writer,
                inbound_rx,
                outbound_rx,
            })),
            state: Mutex::new(None),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            accepts_whispers: AtomicBool::new(false),
        })
    }

    /// The hub-assigned id, or 0 before registration.
    pub fn id(&self) -> SessionId {
        self.id.load(Ordering::Acquire)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Name of the active handler, if any.
    pub fn state_name(&self) -> Option<&'static str> {
        lock(&self.state).as_ref().map(|handler| handler.name())
    }

    /// Whether the active handler relays peer whispers to the client.
    pub fn accepts_whispers(&self) -> bool {
        self.accepts_whispers.load(Ordering::Acquire)
    }

    /// Messages waiting for the write pump.
    pub fn outbound_len(&self) -> usize {
        lock(&self.outbound)
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// Assigns the id, queues the identity notice and starts both pumps.
    ///
    /// The read pump enters `entry` before it handles any message. Returns
    /// false, and starts nothing, when the session was already initialized
    /// or closed before the hub got to it.
    pub fn initialize(self: &Arc<Self>, id: SessionId, entry: Option<Box<dyn StateHandler>>) -> bool {
        let Some(io) = lock(&self.pending).take() else {
            if self.is_closed() {
                debug!("Session from {} closed before initialization", self.peer);
            } else {
                warn!("Session {} initialized twice, ignoring", self.id());
            }
            return false;
        };

        self.id.store(id, Ordering::Release);
        self.send_as_self(Packet::Welcome {
            session_id: id,
            protocol_version: PROTOCOL_VERSION,
        });
        self.started.store(true, Ordering::Release);

        tokio::spawn(Arc::clone(self).write_pump(io.writer, io.outbound_rx));
        tokio::spawn(Arc::clone(self).read_pump(io.reader, io.inbound_rx, entry));
        true
    }

    /// Replaces the active handler.
    ///
    /// Calls `on_exit` on the current handler, swaps, then `bind` and
    /// `on_enter` on the new one. Must only be called from the session's own
    /// processing context and never from inside a handler hook.
    pub fn set_state(self: &Arc<Self>, next: Option<Box<dyn StateHandler>>) {
        let mut slot = lock(&self.state);
        self.accepts_whispers.store(false, Ordering::Release);
        if let Some(mut current) = slot.take() {
            debug!("Session {} leaving {}", self.id(), current.name());
            current.on_exit();
        }

        *slot = next;
        if let Some(handler) = slot.as_mut() {
            debug!("Session {} entering {}", self.id(), handler.name());
            handler.bind(Arc::clone(self));
            self.accepts_whispers
                .store(handler.accepts_whispers(), Ordering::Release);
            handler.on_enter();
        }
    }

    /// Sends a packet to this session's client, signed with this session's id.
    pub fn send_as_self(&self, packet: Packet) -> bool {
        self.send_as(packet, self.id())
    }

    /// Sends a packet to this session's client on behalf of `sender`.
    pub fn send_as(&self, packet: Packet, sender: SessionId) -> bool {
        self.enqueue_outbound(Envelope::new(sender, packet))
    }

    /// Delivers a packet straight to a peer's handler, bypassing the hub.
    ///
    /// Returns false when the peer is this session, is not registered or has
    /// a full queue. A session never delivers to itself: the result would be
    /// indistinguishable from a frame sent by its own client.
    pub fn send_to_peer(&self, packet: Packet, peer: SessionId) -> bool {
        if peer == self.id() {
            debug!("Session {} refused delivery to itself", peer);
            return false;
        }
        match self.hub.session(peer) {
            Some(target) => target.deliver(Envelope::new(self.id(), packet)),
            None => {
                debug!("Session {}: peer {} not found", self.id(), peer);
                false
            }
        }
    }

    /// Hands a packet to the hub for fan-out to every session but this one,
    /// or only to `recipients` when given.
    pub fn broadcast(&self, packet: Packet, recipients: Option<Vec<SessionId>>) -> bool {
        self.hub.broadcast(self.id(), packet, recipients)
    }

    /// Message-processing entry point used by the hub and by peers.
    ///
    /// Queues the envelope for the active handler; drops it when full.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        match self.inbound_tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                warn!(
                    "Session {} inbound queue full, dropping {} from {}",
                    self.id(),
                    envelope.packet.kind(),
                    envelope.sender_id
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Closes the session. Idempotent.
    ///
    /// Queues a final `Disconnected` notice and stops the pumps; the read pump
    /// then exits the active state, unregisters from the hub and closes the
    /// outbound queue, which lets the write pump flush and close the transport.
    pub fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Session {} ({}) closing: {}", self.id(), self.peer, reason);
        self.send_as_self(Packet::Disconnected {
            reason: reason.to_string(),
        });
        self.shutdown.cancel();

        if !self.started.load(Ordering::Acquire) {
            // No read pump will run the teardown.
            if let Some(mut current) = lock(&self.state).take() {
                current.on_exit();
            }
            lock(&self.pending).take();
            lock(&self.outbound).take();
        }
    }

    fn enqueue_outbound(&self, envelope: Envelope) -> bool {
        let outbound = lock(&self.outbound);
        let Some(tx) = outbound.as_ref() else {
            debug!(
                "Session {} closed, dropping outbound {}",
                self.id(),
                envelope.packet.kind()
            );
            return false;
        };

        match tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                warn!(
                    "Session {} outbound queue full, dropping {}",
                    self.id(),
                    envelope.packet.kind()
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Stamps this session's id on a frame from its own client and queues it.
    fn accept_frame(&self, mut envelope: Envelope) {
        let id = self.id();
        if envelope.sender_id != id {
            if envelope.has_sender() {
                debug!(
                    "Session {} frame claimed sender {}, restamping",
                    id, envelope.sender_id
                );
            }
            envelope.sender_id = id;
        }
        self.deliver(envelope);
    }

    fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        let transition = {
            let mut state = lock(&self.state);
            let Some(handler) = state.as_mut() else {
                debug!(
                    "Session {} has no active state, dropping {}",
                    self.id(),
                    envelope.packet.kind()
                );
                return;
            };

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                handler.handle_message(envelope.sender_id, &envelope)
            }));
            match outcome {
                Ok(transition) => transition,
                Err(_) => {
                    error!(
                        "Session {} handler {} panicked on {}",
                        self.id(),
                        handler.name(),
                        envelope.packet.kind()
                    );
                    Transition::Close("internal error".to_string())
                }
            }
        };

        match transition {
            Transition::Stay => {}
            Transition::Switch(next) => self.set_state(Some(next)),
            Transition::Close(reason) => self.close(&reason),
        }
    }

    async fn read_pump(
        self: Arc<Self>,
        mut reader: FrameStream,
        mut inbound_rx: mpsc::Receiver<Envelope>,
        entry: Option<Box<dyn StateHandler>>,
    ) {
        self.set_state(entry);

        let idle_limit = self.config.idle_timeout;
        let idle = sleep(idle_limit.unwrap_or(NO_IDLE_TIMEOUT));
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                Some(envelope) = inbound_rx.recv() => self.dispatch(envelope),

                frame = reader.next() => match frame {
                    Some(Ok(envelope)) => {
                        if let Some(limit) = idle_limit {
                            idle.as_mut().reset(Instant::now() + limit);
                        }
                        self.accept_frame(envelope);
                    }
                    Some(Err(e)) if !e.is_fatal() => {
                        warn!("Session {} dropping bad frame: {}", self.id(), e);
                    }
                    Some(Err(e)) => self.close(&format!("transport error: {}", e)),
                    None => self.close("connection closed"),
                },

                _ = &mut idle, if idle_limit.is_some() => self.close("idle timeout"),
            }
        }

        // Terminal transition, then leave the hub and let the write pump finish.
        self.set_state(None);
        self.hub.unregister(self.id());
        lock(&self.outbound).take();
        debug!("Session {} read pump stopped", self.id());
    }

    async fn write_pump(self: Arc<Self>, mut writer: FrameSink, mut outbound_rx: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = outbound_rx.recv().await {
            if let Err(e) = writer.send(envelope).await {
                warn!("Session {} write failed: {}", self.id(), e);
                self.close("write failed");
                break;
            }
        }

        if let Err(e) = writer.close().await {
            debug!("Session {} transport close: {}", self.id(), e);
        }
        debug!("Session {} write pump stopped", self.id());
    }
}
