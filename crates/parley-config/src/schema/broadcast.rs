//! Fan-out behaviour.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Also deliver each message back to the connection that sent it.
    pub echo_to_sender: bool,
    pub max_frame_bytes: u32,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            echo_to_sender: false,
            max_frame_bytes: 64 * 1024,
        }
    }
}
