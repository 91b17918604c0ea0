//! Outbound queue configuration types.

use serde::{Deserialize, Serialize};

/// What happens when a frame is pushed onto a full outbound queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum DropPolicy {
    /// Evict the oldest queued frame to make room for the new one.
    #[default]
    DropOldest,
    /// Discard the incoming frame and leave the queue untouched.
    DropNewest,
}

/// Per-connection outbound queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: u32,
    pub drop_policy: DropPolicy,
    /// Cumulative drops after which a recipient is disconnected. 0 disables.
    pub slow_consumer_max_drops: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            drop_policy: DropPolicy::DropOldest,
            slow_consumer_max_drops: 1024,
        }
    }
}
