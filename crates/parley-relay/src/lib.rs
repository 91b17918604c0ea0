//! parley-relay: WebSocket chat relay.
//!
//! Accepts WebSocket connections and forwards every valid chat frame a
//! client sends to all other connected clients. Invalid frames are logged
//! and dropped; the sender is never told and stays connected.

pub mod connection;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod server;
pub mod stats;

pub use protocol::ChatMessage;
pub use queue::{Frame, OutboundQueue, PushOutcome};
pub use registry::{ConnectionHandle, ConnectionRegistry, ConnectionState, FanOutReport};
pub use relay::{BroadcastRelay, Delivery, RelayOptions};
pub use server::{RelayServer, ServerSettings};
pub use stats::{RelayStats, StatsSnapshot};
