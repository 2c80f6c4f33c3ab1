//! QuartzKV server binary.
//!
//! Loads the configuration, installs the tracing subscriber, then accepts
//! connections until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use quartzkv::config::ServerConfig;
use quartzkv::connection::{handle_connection, ConnectionStats};
use quartzkv::engine::Engine;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// An in-memory, Redis-compatible key-value server.
#[derive(Debug, Parser)]
#[command(name = "quartzkv", version, about)]
struct Cli {
    /// redis.conf-style configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to bind to
    #[arg(short, long, value_name = "HOST")]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of databases
    #[arg(long)]
    databases: Option<usize>,

    /// Require clients to AUTH with this password
    #[arg(long, value_name = "PASSWORD")]
    requirepass: Option<String>,

    /// Log filter (e.g. info, debug, quartzkv=trace)
    #[arg(long, value_name = "LEVEL")]
    loglevel: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(databases) = self.databases {
            config.databases = databases;
        }
        if let Some(password) = self.requirepass {
            config.requirepass = Some(password);
        }
        if let Some(level) = self.loglevel {
            config.loglevel = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    cli.apply(&mut config);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.loglevel))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(version = quartzkv::VERSION, "Starting QuartzKV");

    let engine = Arc::new(Engine::new(config.engine_config()));
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(address = %config.bind_address(), "Ready to accept connections");

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&engine), Arc::clone(&stats)) => {}
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received, stopping server");
        }
    }

    engine.close();
    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

async fn accept_loop(listener: TcpListener, engine: Arc<Engine>, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    Arc::clone(&engine),
                    Arc::clone(&stats),
                ));
            }
            Err(err) => error!(error = %err, "Failed to accept connection"),
        }
    }
}
