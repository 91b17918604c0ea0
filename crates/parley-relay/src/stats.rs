//! Relay counters, logged periodically by the server.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::relay::Delivery;

#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    decode_failures: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
    disconnected: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub decode_failures: u64,
    pub enqueued: u64,
    pub dropped: u64,
    pub evicted: u64,
    /// Connection tasks that have fully finished, socket released.
    pub disconnected: u64,
}

impl RelayStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fan_out(&self, delivery: &Delivery) {
        self.enqueued
            .fetch_add(delivery.enqueued as u64, Ordering::Relaxed);
        self.dropped
            .fetch_add(delivery.dropped as u64, Ordering::Relaxed);
        self.evicted
            .fetch_add(delivery.evicted.len() as u64, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            disconnected: self.disconnected.load(Ordering::Relaxed),
        }
    }
}
