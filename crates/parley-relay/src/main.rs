//! parley-relay binary: load config, start the server, stop on Ctrl-C.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use parley_config::{load_config, validation, ParleyConfig};
use parley_relay::RelayServer;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "parley-relay", about = "WebSocket chat relay")]
struct Args {
    /// Path to a TOML config file. Defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, overriding the config file.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, overriding the config file.
    #[arg(short, long)]
    port: Option<u16>,
}

fn resolve_config(args: &Args) -> Result<ParleyConfig, parley_common::ConfigError> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = u32::from(port);
    }
    validation::validate(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("parley-relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .init();

    let server = match RelayServer::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(addr = %config.server.bind_addr(), error = %e, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown signal received");
                signal.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "failed to listen for shutdown signal"),
        }
    });

    match server.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "relay failed");
            ExitCode::FAILURE
        }
    }
}
