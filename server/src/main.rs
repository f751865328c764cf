use clap::Parser;
use log::{error, info};
use server::config::{HubConfig, ServerConfig, SessionConfig};
use server::network::Server;
use server::store::MemoryStore;
use shared::RegionId;
use std::sync::Arc;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Regions to load at startup (comma separated)
    #[arg(short, long, value_delimiter = ',', default_value = "0")]
    regions: Vec<RegionId>,

    /// Number of server-driven wandering actors
    #[arg(short, long, default_value = "2")]
    npcs: usize,

    /// Milliseconds between wandering steps
    #[arg(long, default_value = "750")]
    npc_step_ms: u64,

    /// Per-session queue capacity, inbound and outbound
    #[arg(long, default_value = "256")]
    queue_capacity: usize,

    /// Hub broadcast queue capacity
    #[arg(long, default_value = "1024")]
    broadcast_capacity: usize,

    /// Seconds of silence before a session is closed (0 disables)
    #[arg(long, default_value = "60")]
    idle_timeout: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind_addr: format!("{}:{}", args.host, args.port),
            hub: HubConfig {
                broadcast_capacity: args.broadcast_capacity,
            },
            session: SessionConfig {
                inbound_capacity: args.queue_capacity,
                outbound_capacity: args.queue_capacity,
                idle_timeout: (args.idle_timeout > 0).then(|| Duration::from_secs(args.idle_timeout)),
            },
            regions: args.regions,
            npc_count: args.npcs,
            npc_step_interval: Duration::from_millis(args.npc_step_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from(Args::parse());
    info!(
        "Starting server on {} with regions {:?} and {} wandering actors",
        config.bind_addr, config.regions, config.npc_count
    );

    let server = Server::bind(config, Arc::new(MemoryStore::new())).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
