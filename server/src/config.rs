//! Runtime configuration.
//!
//! Built by `main` from command line arguments; every field has a default so
//! tests and embedders can start from `ServerConfig::default()`.

use shared::{RegionId, DEFAULT_PORT};
use std::time::Duration;

/// Per-session queue sizes and liveness settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the queue between the transport/hub and the active handler
    pub inbound_capacity: usize,
    /// Capacity of the queue feeding the write pump
    pub outbound_capacity: usize,
    /// Close the session when no frame arrives for this long
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 256,
            outbound_capacity: 256,
            idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the hub's broadcast channel
    pub broadcast_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub hub: HubConfig,
    pub session: SessionConfig,
    /// Regions imported from the store at startup
    pub regions: Vec<RegionId>,
    /// Number of server-driven wandering actors
    pub npc_count: usize,
    pub npc_step_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            hub: HubConfig::default(),
            session: SessionConfig::default(),
            regions: vec![0],
            npc_count: 2,
            npc_step_interval: Duration::from_millis(750),
        }
    }
}
