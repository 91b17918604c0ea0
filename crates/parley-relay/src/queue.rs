//! Bounded per-connection outbound queue.
//!
//! Producers (the relay, on other connections' reader tasks) push without
//! ever blocking; the single consumer is the owning connection's writer.
//! When full, the configured [`DropPolicy`] decides which frame is lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use parley_config::DropPolicy;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// An encoded outbound frame. Clones share one buffer, so every recipient's
/// queue and socket write uses the bytes encoded once by the relay.
pub type Frame = Utf8Bytes;

/// Result of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The queue was full; its oldest frame was discarded and the new one queued.
    DroppedOldest,
    /// The queue was full; the new frame was discarded.
    DroppedNewest,
    /// The queue is closed and accepts nothing more.
    Closed,
}

impl PushOutcome {
    pub fn is_drop(self) -> bool {
        matches!(self, PushOutcome::DroppedOldest | PushOutcome::DroppedNewest)
    }
}

struct QueueState {
    frames: VecDeque<Frame>,
    closed: bool,
}

pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    policy: DropPolicy,
    dropped: AtomicU64,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Critical sections never panic midway, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a frame without waiting.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            if state.frames.len() < self.capacity {
                state.frames.push_back(frame);
                PushOutcome::Queued
            } else {
                match self.policy {
                    DropPolicy::DropOldest => {
                        state.frames.pop_front();
                        state.frames.push_back(frame);
                        PushOutcome::DroppedOldest
                    }
                    DropPolicy::DropNewest => PushOutcome::DroppedNewest,
                }
            }
        };

        if outcome.is_drop() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if outcome != PushOutcome::DroppedNewest {
            self.notify.notify_one();
        }
        outcome
    }

    /// Wait for the next frame. Returns `None` once the queue is closed and
    /// every frame queued before the close has been handed out.
    ///
    /// Only one task may consume a queue.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            {
                let mut state = self.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            // notify_one stores a permit, so a push between the check and here is not lost.
            self.notify.notified().await;
        }
    }

    /// Stop accepting frames. Already queued frames stay available to `pop`.
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        let newly_closed = {
            let mut state = self.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if newly_closed {
            self.notify.notify_one();
        }
        newly_closed
    }

    /// Close and throw away whatever is still queued. Returns how many
    /// frames were discarded.
    pub fn discard(&self) -> usize {
        let discarded = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.frames).len()
        };
        self.notify.notify_one();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> DropPolicy {
        self.policy
    }

    /// Frames lost to the drop policy over the queue's lifetime.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
