//! Broadcast relay: decode inbound frames and fan them out.
//!
//! Runs inline on the sending connection's reader task, so messages from
//! one source reach every recipient queue in the order they were read.
//! Pushes never block; a full recipient queue loses a frame according to
//! its drop policy and the sender is never told.

use std::sync::Arc;

use parley_common::{ConnectionId, DecodeError};
use parley_config::ParleyConfig;
use tracing::{debug, trace, warn};

use crate::protocol::ChatMessage;
use crate::queue::PushOutcome;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::stats::RelayStats;

/// Fan-out behaviour knobs, taken from the `[broadcast]` and `[queue]` config sections.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub echo_to_sender: bool,
    pub max_frame_bytes: usize,
    /// Cumulative drops after which a recipient is disconnected. 0 disables.
    pub slow_consumer_max_drops: u64,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self::from_config(&ParleyConfig::default())
    }
}

impl RelayOptions {
    pub fn from_config(config: &ParleyConfig) -> Self {
        Self {
            echo_to_sender: config.broadcast.echo_to_sender,
            max_frame_bytes: config.broadcast.max_frame_bytes as usize,
            slow_consumer_max_drops: config.queue.slow_consumer_max_drops,
        }
    }
}

/// What one successful fan-out did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Recipients whose queue now holds the frame.
    pub enqueued: usize,
    /// Frames lost to a full queue (either the new frame or an evicted old one).
    pub dropped: usize,
    /// Slow consumers disconnected after this fan-out.
    pub evicted: Vec<ConnectionId>,
}

pub struct BroadcastRelay {
    registry: Arc<ConnectionRegistry>,
    options: RelayOptions,
    stats: Arc<RelayStats>,
}

impl BroadcastRelay {
    pub fn new(registry: Arc<ConnectionRegistry>, options: RelayOptions) -> Self {
        Self {
            registry,
            options,
            stats: Arc::new(RelayStats::default()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Handle one raw inbound payload from `source`.
    ///
    /// A decode error is logged and returned for the caller's information
    /// only: the source stays connected and nothing is broadcast.
    pub async fn on_message(
        &self,
        source: ConnectionId,
        raw: &[u8],
    ) -> Result<Delivery, DecodeError> {
        self.stats.record_received();

        let message = match ChatMessage::decode(raw, self.options.max_frame_bytes) {
            Ok(m) => m,
            Err(e) => {
                self.stats.record_decode_failure();
                warn!(conn = %source, error = %e, "dropping invalid chat frame");
                return Err(e);
            }
        };
        trace!(conn = %source, sender = %message.sender, "received chat message");

        let frame = message.encode()?;
        let threshold = self.options.slow_consumer_max_drops;
        let mut delivery = Delivery::default();

        let enqueue = |handle: &ConnectionHandle| {
            let outcome = handle.queue().push(frame.clone());
            match outcome {
                PushOutcome::Queued => delivery.enqueued += 1,
                PushOutcome::DroppedOldest => {
                    delivery.enqueued += 1;
                    delivery.dropped += 1;
                }
                PushOutcome::DroppedNewest => delivery.dropped += 1,
                PushOutcome::Closed => return Err(outcome),
            }
            if outcome.is_drop() {
                let drops = handle.queue().dropped();
                debug!(conn = %handle.id(), total_drops = drops, "recipient queue full");
                if threshold > 0 && drops >= threshold {
                    delivery.evicted.push(handle.id());
                }
                return Err(outcome);
            }
            Ok(())
        };

        let report = if self.options.echo_to_sender {
            self.registry.for_each(enqueue).await
        } else {
            self.registry.for_each_except(source, enqueue).await
        };

        for id in &delivery.evicted {
            if self.registry.unregister(*id).await {
                warn!(conn = %id, threshold, "disconnecting slow consumer");
            }
        }

        self.stats.record_fan_out(&delivery);
        debug!(
            conn = %source,
            recipients = report.visited,
            enqueued = delivery.enqueued,
            dropped = delivery.dropped,
            "broadcast chat message"
        );
        Ok(delivery)
    }
}
