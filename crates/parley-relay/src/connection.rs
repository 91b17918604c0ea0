//! Per-connection handler: handshake, register, then run a reader and a
//! writer until either side ends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::relay::BroadcastRelay;

type WsStream = WebSocketStream<TcpStream>;

/// How long an unregistered connection's writer waits on the close handshake.
const ABORTED_CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Handle a single accepted TCP connection for its whole lifetime.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    relay: Arc<BroadcastRelay>,
    idle_timeout: Option<Duration>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %addr, error = %e, "WS handshake failed");
            return;
        }
    };
    let (mut sink, stream) = ws.split();

    let handle = match relay.registry().register(addr).await {
        Ok(handle) => handle,
        Err(e) => {
            info!(peer = %addr, error = %e, "refusing connection");
            let frame = CloseFrame {
                code: CloseCode::Away,
                reason: e.to_string().into(),
            };
            let _ = sink.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    info!(conn = %handle.id(), peer = %addr, "client connected");

    // Aborted with this task if the server gives up waiting on shutdown.
    let writer = AbortOnDropHandle::new(tokio::spawn(write_loop(
        sink,
        Arc::clone(&handle),
        Arc::clone(relay.registry()),
    )));

    read_loop(stream, &handle, &relay, idle_timeout).await;

    handle.begin_close();
    relay.registry().unregister(handle.id()).await;

    if let Err(e) = writer.await {
        debug!(conn = %handle.id(), error = %e, "writer task ended abnormally");
    }

    relay.stats().record_disconnect();
    info!(conn = %handle.id(), peer = %addr, "client disconnected");
}

/// Feed inbound frames to the relay until the stream ends, errors, idles
/// out, or the connection is unregistered elsewhere.
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    handle: &ConnectionHandle,
    relay: &BroadcastRelay,
    idle_timeout: Option<Duration>,
) {
    loop {
        let next = tokio::select! {
            _ = handle.closed() => break,
            next = next_frame(&mut stream, idle_timeout) => next,
        };

        let frame = match next {
            Ok(frame) => frame,
            Err(_) => {
                info!(conn = %handle.id(), "closing idle connection");
                break;
            }
        };

        // Decode failures are logged by the relay and otherwise ignored.
        match frame {
            Some(Ok(Message::Text(text))) => {
                let _ = relay
                    .on_message(handle.id(), text.as_str().as_bytes())
                    .await;
            }
            Some(Ok(Message::Binary(data))) => {
                let _ = relay.on_message(handle.id(), &data[..]).await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(conn = %handle.id(), error = %e, "WS error");
                break;
            }
            // tungstenite answers pings itself.
            Some(Ok(_)) => {}
        }
    }
}

async fn next_frame(
    stream: &mut SplitStream<WsStream>,
    idle_timeout: Option<Duration>,
) -> Result<Option<Result<Message, tokio_tungstenite::tungstenite::Error>>, tokio::time::error::Elapsed>
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next()).await,
        None => Ok(stream.next().await),
    }
}

/// Drain the outbound queue to the socket. Ends once the queue is closed
/// and empty, or on the first write failure.
///
/// If the connection is unregistered (peer gone, evicted as a slow consumer)
/// the writer stops at once, even mid-write, discards what is queued and
/// gives the close handshake [`ABORTED_CLOSE_TIMEOUT`] before dropping the
/// sink. Only a graceful shutdown flushes the queue.
async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    handle: Arc<ConnectionHandle>,
    registry: Arc<ConnectionRegistry>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = handle.aborted() => break,
            frame = handle.queue().pop() => frame,
        };
        let Some(frame) = frame else {
            if let Err(e) = sink.close().await {
                debug!(conn = %handle.id(), error = %e, "close handshake failed");
            }
            return;
        };

        // A peer that stops reading blocks this send once its TCP window fills.
        let sent = tokio::select! {
            biased;
            _ = handle.aborted() => break,
            sent = sink.send(Message::Text(frame)) => sent,
        };
        if let Err(e) = sent {
            debug!(conn = %handle.id(), error = %e, "write failed");
            handle.begin_close();
            registry.unregister(handle.id()).await;
            return;
        }
    }

    // Best effort: a peer that closed cleanly still gets its close reply, a
    // stalled one is cut off when the timer runs out.
    match tokio::time::timeout(ABORTED_CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => debug!(conn = %handle.id(), "writer aborted"),
        Ok(Err(e)) => debug!(conn = %handle.id(), error = %e, "writer aborted, close failed"),
        Err(_) => debug!(conn = %handle.id(), "writer aborted, dropping stalled socket"),
    }
}
