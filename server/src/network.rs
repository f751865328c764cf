//! Server network layer: TCP accept loop and server-driven sessions

use crate::config::{ServerConfig, SessionConfig};
use crate::error::ServerError;
use crate::hub::{Hub, HubHandle};
use crate::session::Session;
use crate::state::{ConnectedState, NpcState};
use crate::store::WorldStore;
use crate::transport::Connection;
use crate::world::World;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Capacity of the in-memory transport backing a server-driven session
const NPC_TRANSPORT_CAPACITY: usize = 16;

const NPC_NAMES: [&str; 4] = ["rat", "crow", "beetle", "toad"];

/// Accepts connections and hands each one to the hub as a new session
pub struct Server {
    listener: TcpListener,
    hub: HubHandle,
    world: Arc<World>,
    config: ServerConfig,
}

impl Server {
    /// Loads the world, binds the listener and starts the hub.
    ///
    /// Fails if no configured region could be imported or the address cannot
    /// be bound. Server-driven sessions are started before this returns.
    pub async fn bind(config: ServerConfig, store: Arc<dyn WorldStore>) -> Result<Self, ServerError> {
        let spawn_region = config.regions.first().copied().unwrap_or_default();
        let world = Arc::new(World::new(store, spawn_region));

        let reports = world.import_regions(&config.regions);
        if reports.iter().all(|report| report.result.is_err()) {
            let reasons: Vec<String> = reports
                .iter()
                .filter_map(|report| report.result.as_ref().err().map(|e| e.to_string()))
                .collect();
            return Err(ServerError::WorldLoad(if reasons.is_empty() {
                "no regions configured".to_string()
            } else {
                reasons.join("; ")
            }));
        }

        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        info!("Server listening on {}", listener.local_addr()?);

        let hub = Hub::spawn(&config.hub);
        let server = Self {
            listener,
            hub,
            world,
            config,
        };
        server.spawn_npcs();
        Ok(server)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// Accept loop; runs until the task is dropped
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Accepted connection from {}", addr);
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }
                    self.accept(Connection::from_tcp(stream));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Wraps a connection in a session and registers it in the waiting-for-login state
    pub fn accept(&self, connection: Connection) -> bool {
        let session = Session::new(connection, self.hub.clone(), self.config.session.clone());
        self.hub
            .register(session, Box::new(ConnectedState::new(Arc::clone(&self.world))))
    }

    /// Starts the configured number of wandering actors on in-memory transports
    fn spawn_npcs(&self) {
        for index in 0..self.config.npc_count {
            let (connection, mut remote) = Connection::in_memory(NPC_TRANSPORT_CAPACITY);
            let config = SessionConfig {
                idle_timeout: None,
                ..self.config.session.clone()
            };
            let session = Session::new(connection, self.hub.clone(), config);
            let name = format!("{}-{}", NPC_NAMES[index % NPC_NAMES.len()], index + 1);
            let state = NpcState::new(
                Arc::clone(&self.world),
                &name,
                self.config.npc_step_interval,
            );

            if !self.hub.register(session, Box::new(state)) {
                warn!("Hub rejected server-driven session {}", name);
                continue;
            }

            // Keeps the transport open and discards whatever the session writes
            tokio::spawn(async move {
                while remote.next().await.is_some() {}
                debug!("Server-driven session {} finished", name);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use shared::{Envelope, EnvelopeCodec, Packet};
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout};
    use tokio_util::codec::Framed;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            npc_count: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_fails_without_any_region() {
        let config = ServerConfig {
            regions: vec![40, 41],
            ..test_config()
        };
        let result = Server::bind(config, Arc::new(MemoryStore::new())).await;
        assert!(matches!(result, Err(ServerError::WorldLoad(_))));
    }

    #[tokio::test]
    async fn test_bind_tolerates_partial_failure() {
        let config = ServerConfig {
            regions: vec![0, 40],
            ..test_config()
        };
        let server = Server::bind(config, Arc::new(MemoryStore::new())).await.unwrap();
        assert!(server.world().terrain().has_region(0));
        assert!(!server.world().terrain().has_region(40));
    }

    #[tokio::test]
    async fn test_bind_reports_bad_address() {
        let config = ServerConfig {
            bind_addr: "256.0.0.1:1".to_string(),
            ..test_config()
        };
        let result = Server::bind(config, Arc::new(MemoryStore::new())).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_npcs_register_as_sessions() {
        let config = ServerConfig {
            npc_count: 2,
            ..test_config()
        };
        let server = Server::bind(config, Arc::new(MemoryStore::new())).await.unwrap();

        timeout(Duration::from_secs(2), async {
            while server.world().roster().len() != 2 || server.hub().sessions().len() != 2 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(server
            .world()
            .roster()
            .iter()
            .all(|(_, actor)| actor.kind == crate::world::ActorKind::Npc));
    }

    #[tokio::test]
    async fn test_tcp_client_gets_welcome() {
        let server = Server::bind(test_config(), Arc::new(MemoryStore::new()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, EnvelopeCodec::new());

        let first = timeout(Duration::from_secs(2), framed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(first.packet, Packet::Welcome { .. }));
        assert_ne!(first.sender_id, 0);

        framed
            .send(Envelope::unsigned(Packet::Logout))
            .await
            .unwrap();
    }
}
