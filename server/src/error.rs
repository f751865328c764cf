//! Error types for the server.
//!
//! Nothing on the hot path (pumps, hub loop, handler dispatch) returns these;
//! faults there are logged and contained to one session. These cover the
//! collaborators and startup.

use shared::RegionId;

/// Failures reported by a [`crate::store::WorldStore`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("region {0} is not available")]
    RegionUnavailable(RegionId),

    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("bad query: {0}")]
    BadQuery(String),
}

/// Startup failures that keep the server from reaching its serving loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("world load failed: {0}")]
    WorldLoad(String),
}
