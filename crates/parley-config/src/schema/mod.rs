//! Configuration schema types for the relay.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod broadcast;
mod connection;
mod logging;
mod queue;
mod server;

pub use broadcast::*;
pub use connection::*;
pub use logging::*;
pub use queue::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub broadcast: BroadcastConfig,
    pub connection: ConnectionConfig,
    pub logging: LoggingConfig,
}

// =============================================================================
// Tests
// =============================================================================
