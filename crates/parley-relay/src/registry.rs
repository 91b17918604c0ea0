//! Connection registry: the authoritative set of live connections.
//!
//! Membership is guarded by a read-write lock. Fan-out holds the read lock
//! while it pushes onto queues, so an `unregister` (write lock) either
//! happens before a fan-out sees the connection or after it has finished
//! with it. Each connection's queue has its own lock, so one slow reader
//! never holds up the others.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parley_common::{ConnectionId, ConnectionIdGenerator, RegistryError};
use parley_config::DropPolicy;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::queue::OutboundQueue;

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Registry-side view of one connection: its queue, its state, and the
/// tokens that stop its reader and writer.
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    queue: OutboundQueue,
    state: AtomicU8,
    closed: CancellationToken,
    aborted: CancellationToken,
}

impl ConnectionHandle {
    fn new(id: ConnectionId, peer: SocketAddr, capacity: usize, policy: DropPolicy) -> Self {
        Self {
            id,
            peer,
            queue: OutboundQueue::new(capacity, policy),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            closed: CancellationToken::new(),
            aborted: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Move to `Closing` unless already closing or closed.
    pub fn begin_close(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < ConnectionState::Closing as u8).then_some(ConnectionState::Closing as u8)
            });
    }

    /// Resolves once the connection has been unregistered.
    pub fn closed(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves when the writer must give up without flushing: the
    /// connection was removed for any reason other than relay shutdown.
    pub fn aborted(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.aborted.cancelled()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_cancelled()
    }

    fn mark(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Terminal transition. Runs once, from whichever call removed the entry.
    /// Without `drain` the writer is told to drop its socket immediately.
    fn finish(&self, drain: bool) {
        self.mark(ConnectionState::Closed);
        if drain {
            self.queue.close();
        } else {
            self.queue.discard();
            self.aborted.cancel();
        }
        self.closed.cancel();
    }
}

/// Outcome of iterating the registry for a fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub visited: usize,
    pub failed: usize,
}

struct Members {
    connections: HashMap<ConnectionId, Arc<ConnectionHandle>>,
    draining: bool,
}

pub struct ConnectionRegistry {
    members: RwLock<Members>,
    ids: ConnectionIdGenerator,
    queue_capacity: usize,
    drop_policy: DropPolicy,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize, drop_policy: DropPolicy) -> Self {
        Self {
            members: RwLock::new(Members {
                connections: HashMap::new(),
                draining: false,
            }),
            ids: ConnectionIdGenerator::new(),
            queue_capacity,
            drop_policy,
        }
    }

    /// Add a freshly handshaken connection and mark it `Open`.
    pub async fn register(
        &self,
        peer: SocketAddr,
    ) -> Result<Arc<ConnectionHandle>, RegistryError> {
        let mut members = self.members.write().await;
        if members.draining {
            return Err(RegistryError::RegistrationRefused);
        }

        let id = self.ids.next_id();
        let handle = Arc::new(ConnectionHandle::new(
            id,
            peer,
            self.queue_capacity,
            self.drop_policy,
        ));
        handle.mark(ConnectionState::Open);
        members.connections.insert(id, Arc::clone(&handle));
        debug!(conn = %id, peer = %peer, total = members.connections.len(), "registered");
        Ok(handle)
    }

    /// Remove a connection, close its queue and stop its reader and writer.
    /// Queued frames are discarded, so a writer stalled on a client that
    /// stopped reading still lets go of the socket.
    ///
    /// Idempotent: only the call that actually removes the entry returns
    /// `true` and performs the close.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.members.write().await.connections.remove(&id);
        match removed {
            Some(handle) => {
                handle.begin_close();
                handle.finish(false);
                debug!(conn = %id, "unregistered");
                true
            }
            None => false,
        }
    }

    /// Call `f` for every live connection except `except`.
    ///
    /// `f` failing for one connection does not stop the iteration.
    pub async fn for_each_except<F, E>(&self, except: ConnectionId, mut f: F) -> FanOutReport
    where
        F: FnMut(&ConnectionHandle) -> Result<(), E>,
    {
        let members = self.members.read().await;
        let mut report = FanOutReport::default();
        for handle in members.connections.values() {
            if handle.id == except || !handle.is_open() {
                continue;
            }
            report.visited += 1;
            if f(handle).is_err() {
                report.failed += 1;
            }
        }
        report
    }

    /// Call `f` for every live connection.
    pub async fn for_each<F, E>(&self, mut f: F) -> FanOutReport
    where
        F: FnMut(&ConnectionHandle) -> Result<(), E>,
    {
        let members = self.members.read().await;
        let mut report = FanOutReport::default();
        for handle in members.connections.values().filter(|h| h.is_open()) {
            report.visited += 1;
            if f(handle).is_err() {
                report.failed += 1;
            }
        }
        report
    }

    /// Refuse further registrations and drain-and-close every connection.
    ///
    /// Returns how many connections were open.
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<Arc<ConnectionHandle>> = {
            let mut members = self.members.write().await;
            members.draining = true;
            members.connections.drain().map(|(_, h)| h).collect()
        };
        for handle in &drained {
            handle.begin_close();
            handle.finish(true);
        }
        drained.len()
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.members.read().await.connections.get(&id).cloned()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.members.read().await.connections.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_draining(&self) -> bool {
        self.members.read().await.draining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Frame, PushOutcome};

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn frame(s: &str) -> Frame {
        Frame::from(s.to_string())
    }

    fn text(frame: Option<Frame>) -> Option<String> {
        frame.map(|f| f.as_str().to_owned())
    }

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(8, DropPolicy::DropOldest)
    }

    #[tokio::test]
    async fn register_assigns_unique_ids_and_opens() {
        let reg = registry();
        let a = reg.register(peer()).await.unwrap();
        let b = reg.register(peer()).await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), ConnectionState::Open);
        assert_eq!(reg.len().await, 2);
        assert!(reg.contains(a.id()).await);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let reg = registry();
        let a = reg.register(peer()).await.unwrap();

        assert!(reg.unregister(a.id()).await);
        assert!(!reg.unregister(a.id()).await);
        assert!(!reg.unregister(a.id()).await);

        assert_eq!(a.state(), ConnectionState::Closed);
        assert!(a.is_closed());
        assert!(a.is_aborted());
        assert!(a.queue().is_empty());
        assert!(a.queue().is_closed());
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_unregister_closes_exactly_once() {
        let reg = Arc::new(registry());
        let a = reg.register(peer()).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let reg = Arc::clone(&reg);
            let id = a.id();
            tasks.push(tokio::spawn(async move { reg.unregister(id).await }));
        }
        let mut removed = 0;
        for t in tasks {
            if t.await.unwrap() {
                removed += 1;
            }
        }
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn unregistered_connection_gets_nothing_more() {
        let reg = registry();
        let a = reg.register(peer()).await.unwrap();
        let b = reg.register(peer()).await.unwrap();
        reg.unregister(b.id()).await;

        let report = reg
            .for_each_except(a.id(), |h| match h.queue().push(frame("x")) {
                PushOutcome::Closed => Err(()),
                _ => Ok(()),
            })
            .await;

        assert_eq!(report, FanOutReport::default());
        assert_eq!(b.queue().push(frame("late")), PushOutcome::Closed);
        assert!(b.queue().is_empty());
    }

    #[tokio::test]
    async fn for_each_except_skips_the_excluded_id() {
        let reg = registry();
        let a = reg.register(peer()).await.unwrap();
        let b = reg.register(peer()).await.unwrap();
        let c = reg.register(peer()).await.unwrap();

        let mut seen = Vec::new();
        let report = reg
            .for_each_except(b.id(), |h| {
                seen.push(h.id());
                Ok::<(), ()>(())
            })
            .await;

        seen.sort();
        assert_eq!(seen, vec![a.id(), c.id()]);
        assert_eq!(report.visited, 2);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn for_each_except_tolerates_failures() {
        let reg = registry();
        let src = reg.register(peer()).await.unwrap();
        let bad = reg.register(peer()).await.unwrap();
        reg.register(peer()).await.unwrap();
        reg.register(peer()).await.unwrap();

        let mut ok = 0;
        let report = reg
            .for_each_except(src.id(), |h| {
                if h.id() == bad.id() {
                    Err("full")
                } else {
                    ok += 1;
                    Ok(())
                }
            })
            .await;

        assert_eq!(report.visited, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(ok, 2);
    }

    #[tokio::test]
    async fn for_each_visits_everyone() {
        let reg = registry();
        for _ in 0..3 {
            reg.register(peer()).await.unwrap();
        }
        let report = reg.for_each(|_| Ok::<(), ()>(())).await;
        assert_eq!(report.visited, 3);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_registrations() {
        let reg = registry();
        let a = reg.register(peer()).await.unwrap();
        a.queue().push(frame("pending"));

        assert_eq!(reg.shutdown().await, 1);
        assert!(reg.is_draining().await);
        assert!(reg.is_empty().await);
        assert!(a.is_closed());
        assert!(!a.is_aborted());

        let err = reg.register(peer()).await.err();
        assert_eq!(err, Some(RegistryError::RegistrationRefused));

        // Queued frames survive the close so the writer can flush them.
        assert_eq!(text(a.queue().pop().await).as_deref(), Some("pending"));
        assert_eq!(a.queue().pop().await, None);
    }

    #[tokio::test]
    async fn closed_future_resolves_after_unregister() {
        let reg = registry();
        let a = reg.register(peer()).await.unwrap();
        reg.unregister(a.id()).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), a.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unregister_releases_a_stalled_writer() {
        let reg = registry();
        let a = reg.register(peer()).await.unwrap();
        a.queue().push(frame("never read"));

        reg.unregister(a.id()).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), a.aborted())
            .await
            .unwrap();
    }

    #[test]
    fn begin_close_never_reopens() {
        let h = ConnectionHandle::new(ConnectionId::new(1), peer(), 1, DropPolicy::DropOldest);
        h.mark(ConnectionState::Open);
        h.begin_close();
        assert_eq!(h.state(), ConnectionState::Closing);
        h.mark(ConnectionState::Closed);
        h.begin_close();
        assert_eq!(h.state(), ConnectionState::Closed);
    }
}
