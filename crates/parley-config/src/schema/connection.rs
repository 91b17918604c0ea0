//! Connection lifecycle timing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Close a connection after this many seconds without an inbound frame. 0 disables.
    pub idle_timeout_secs: u64,
    /// How long writers get to flush their queues on shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 0,
            shutdown_grace_ms: 5000,
        }
    }
}
