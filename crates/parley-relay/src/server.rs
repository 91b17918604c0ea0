//! Listener and accept loop with structured shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parley_common::Result;
use parley_config::ParleyConfig;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::handle_connection;
use crate::registry::ConnectionRegistry;
use crate::relay::{BroadcastRelay, RelayOptions};

/// Timing knobs for the accept loop, taken from `[connection]` and `[logging]`.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub idle_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
    pub stats_interval: Option<Duration>,
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl ServerSettings {
    pub fn from_config(config: &ParleyConfig) -> Self {
        Self {
            idle_timeout: non_zero_secs(config.connection.idle_timeout_secs),
            shutdown_grace: Duration::from_millis(config.connection.shutdown_grace_ms),
            stats_interval: non_zero_secs(config.logging.stats_interval_secs),
        }
    }
}

pub struct RelayServer {
    listener: TcpListener,
    relay: Arc<BroadcastRelay>,
    settings: ServerSettings,
}

impl RelayServer {
    /// Bind the listener described by `config.server`.
    pub async fn bind(config: &ParleyConfig) -> Result<Self> {
        let addr = config.server.bind_addr();
        let listener = TcpListener::bind(&addr).await?;

        let registry = Arc::new(ConnectionRegistry::new(
            config.queue.capacity as usize,
            config.queue.drop_policy,
        ));
        let relay = Arc::new(BroadcastRelay::new(
            registry,
            RelayOptions::from_config(config),
        ));

        Ok(Self {
            listener,
            relay,
            settings: ServerSettings::from_config(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn relay(&self) -> &Arc<BroadcastRelay> {
        &self.relay
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.relay.registry()
    }

    /// Accept connections until `shutdown` is cancelled, then drain.
    ///
    /// Connection failures never end the loop. A panic in a connection task
    /// is re-raised here: relay state can no longer be trusted.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            listener,
            relay,
            settings,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!("parley-relay listening on {}", addr);
        }

        let stats_task = settings.stats_interval.map(|every| {
            tokio::spawn(log_stats(Arc::clone(&relay), every, shutdown.child_token()))
        });

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(peer = %addr, "TCP connection accepted");
                        tasks.spawn(handle_connection(
                            stream,
                            addr,
                            Arc::clone(&relay),
                            settings.idle_timeout,
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "TCP accept error");
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            std::panic::resume_unwind(e.into_panic());
                        }
                    }
                }
            }
        }

        drop(listener);
        let drained = relay.registry().shutdown().await;
        info!(connections = drained, "shutting down, draining outbound queues");

        let flushed = tokio::time::timeout(settings.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if flushed.is_err() {
            warn!(
                remaining = tasks.len(),
                grace_ms = settings.shutdown_grace.as_millis() as u64,
                "grace period elapsed, aborting connections"
            );
            tasks.shutdown().await;
        }

        if let Some(task) = stats_task {
            task.abort();
        }
        info!("parley-relay stopped");
        Ok(())
    }
}

async fn log_stats(relay: Arc<BroadcastRelay>, every: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let connections = relay.registry().len().await;
                let s = relay.stats().snapshot();
                info!(
                    connections,
                    received = s.received,
                    enqueued = s.enqueued,
                    dropped = s.dropped,
                    decode_failures = s.decode_failures,
                    evicted = s.evicted,
                    disconnected = s.disconnected,
                    "relay stats"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_treat_zero_as_disabled() {
        let mut config = ParleyConfig::default();
        config.connection.idle_timeout_secs = 0;
        config.logging.stats_interval_secs = 0;
        let settings = ServerSettings::from_config(&config);
        assert!(settings.idle_timeout.is_none());
        assert!(settings.stats_interval.is_none());
        assert_eq!(settings.shutdown_grace, Duration::from_millis(5000));
    }

    #[test]
    fn settings_convert_seconds() {
        let mut config = ParleyConfig::default();
        config.connection.idle_timeout_secs = 30;
        let settings = ServerSettings::from_config(&config);
        assert_eq!(settings.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.stats_interval, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn bind_on_ephemeral_port() {
        let mut config = ParleyConfig::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 0;
        let server = RelayServer::bind(&config).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert!(server.registry().is_empty().await);
    }

    #[tokio::test]
    async fn run_returns_after_shutdown() {
        let mut config = ParleyConfig::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 0;
        let server = RelayServer::bind(&config).await.unwrap();
        let registry = Arc::clone(server.registry());

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(server.run(shutdown.clone()));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(registry.is_draining().await);
    }
}
