use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one accepted client connection.
///
/// Assigned by the registry at registration time and never reused within a
/// registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Monotonically increasing source of connection ids, starting at 1.
#[derive(Debug)]
pub struct ConnectionIdGenerator {
    next: AtomicU64,
}

impl ConnectionIdGenerator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_starts_at_one() {
        let ids = ConnectionIdGenerator::new();
        assert_eq!(ids.next_id().get(), 1);
        assert_eq!(ids.next_id().get(), 2);
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let ids = ConnectionIdGenerator::default();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn independent_generators_do_not_share_state() {
        let first = ConnectionIdGenerator::new();
        let second = ConnectionIdGenerator::new();
        first.next_id();
        first.next_id();
        assert_eq!(second.next_id(), ConnectionId::new(1));
    }

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId::new(42).to_string(), "conn-42");
    }

    #[test]
    fn connection_id_serialization() {
        let id = ConnectionId::new(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "7");
        let back: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn connection_id_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(ConnectionId::new(3));
        set.insert(ConnectionId::new(3));
        assert_eq!(set.len(), 1);
    }
}
