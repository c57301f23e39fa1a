//! `cartod` command line.
//!
//! The daemon runs in the foreground and stops on SIGINT or SIGTERM.
//! Process supervision (restarts, backgrounding, log capture) belongs to
//! whatever launches it.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::hub::spawn_hub;
use crate::server::SyncServer;

/// Cartographer sync daemon - real-time board notifications over WebSocket
#[derive(Parser, Debug)]
#[command(name = "cartod", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve WebSocket clients until interrupted (the default)
    Serve(Overrides),
    /// Print the effective configuration as TOML and exit
    Config(Overrides),
}

/// Where configuration comes from, highest precedence last.
#[derive(Args, Debug, Clone, Default)]
struct Overrides {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config and environment)
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to bind (overrides config and environment)
    #[arg(short, long)]
    port: Option<u16>,
}

impl Overrides {
    /// Loads file and environment config, then applies the flags on top.
    fn resolve(&self) -> Result<Config> {
        resolve_config(self.config.as_deref(), self.host, self.port)
    }
}

fn resolve_config(
    path: Option<&Path>,
    host: Option<IpAddr>,
    port: Option<u16>,
) -> Result<Config> {
    let mut config = Config::load(path).context("Failed to load configuration")?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    Ok(config)
}

/// Entry point for the `cartod` binary.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config(overrides)) => {
            let config = overrides.resolve()?;
            let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{text}");
            Ok(())
        }
        Some(Command::Serve(overrides)) => serve(overrides.resolve()?),
        None => serve(cli.overrides.resolve()?),
    }
}

#[tokio::main]
async fn serve(config: Config) -> Result<()> {
    init_tracing()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.socket_addr(),
        "Cartographer sync daemon starting"
    );

    let cancel_token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel_token.clone()));

    let hub = spawn_hub(&config.hub);
    SyncServer::new(config, hub, cancel_token)
        .run()
        .await
        .inspect_err(|e| error!(error = %e, "Server error"))?;

    info!("Cartographer sync daemon stopped");
    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("cartod=info".parse()?)
        .add_directive("carto_core=info".parse()?)
        .add_directive("carto_protocol=info".parse()?)
        .add_directive("tower_http=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Cancels `token` on the first SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    let signal = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    };
    #[cfg(not(unix))]
    let signal = async { tokio::signal::ctrl_c().await.map(|()| "Ctrl+C") };

    match signal.await {
        Ok(name) => info!(signal = name, "Shutdown requested"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signals, stopping"),
    }
    token.cancel();
}
