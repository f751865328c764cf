//! # Session Hub Server Library
//!
//! This library provides the connection hub and session layer of a
//! multi-user text world server. It owns every accepted connection, routes
//! messages between connections, and drives per-connection behavior through
//! pluggable state handlers.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Each accepted connection becomes a [`session::Session`] with its own
//! read and write tasks. The [`hub::Hub`] assigns the session an id, makes it
//! reachable by other sessions, and forgets it when it closes:
//! - Identity is announced with a `Welcome` frame before anything else
//! - Inbound frames are always stamped with the session's own id
//! - Closing is idempotent and always tears the active handler down once
//!
//! ### Routing
//! Sessions talk to each other only through the hub: broadcast to all,
//! broadcast to a subset, or deliver to one peer. Every queue is bounded and
//! sheds the newest message when full, so a stalled peer never blocks the
//! hub or another session.
//!
//! ### Shared World
//! Handlers read and mutate a shared [`world::World`] built from two
//! concurrent containers: the id-keyed [`registry::Registry`] and the
//! region/point-keyed [`spatial::SpatialIndex`].
//!
//! ## Module Organization
//!
//! - `config`: queue sizes, timeouts and startup settings
//! - `error`: error types for collaborators and startup
//! - `hub`: the event loop that owns the session table
//! - `network`: TCP accept loop and server-driven sessions
//! - `registry`: thread-safe handle registry
//! - `session`: connection-bound actor with read and write pumps
//! - `spatial`: per-region point index
//! - `state`: the handler contract and the built-in handlers
//! - `store`: persistence collaborator and its in-memory implementation
//! - `transport`: framed TCP and in-memory connections
//! - `world`: actors, terrain and objects
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default(), Arc::new(MemoryStore::new())).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod network;
pub mod registry;
pub mod session;
pub mod spatial;
pub mod state;
pub mod store;
pub mod transport;
pub mod world;
