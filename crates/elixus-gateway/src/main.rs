//! elixus-gateway - connect to a gateway and log what it sends.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use elixus_gateway::{GatewayClient, GatewayConfig, GatewayEvent};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "elixus-gateway")]
#[command(about = "Real-time gateway client")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and log every dispatch until interrupted
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "elixus-gateway.toml")]
        config: PathBuf,

        /// Authentication token, overriding the config file
        #[arg(long, env = "ELIXUS_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Gateway URL, overriding the config file
        #[arg(long)]
        url: Option<String>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "elixus-gateway.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("elixus_gateway=info"));
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    match cli.command {
        Commands::Run { config, token, url } => run(config, token, url).await,
        Commands::InitConfig { output } => init_config(&output),
    }
}

async fn run(config_path: PathBuf, token: Option<String>, url: Option<String>) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "loading config");

    let mut config = GatewayConfig::from_file(&config_path)?;
    if let Some(token) = token {
        config.token = token;
    }
    if let Some(url) = url {
        config.url = url;
    }
    config.validate()?;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut client = GatewayClient::new(config).with_events(events_tx);
    client.router_mut().on_any_dispatch(|envelope| {
        info!(
            event = envelope.event_name().unwrap_or_default(),
            seq = ?envelope.s,
            "dispatch"
        );
    });

    let handle = client.handle();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                GatewayEvent::HeartbeatAcked { latency } => {
                    info!(latency_ms = latency.as_millis() as u64, "heartbeat acknowledged");
                }
                other => info!(event = ?other, "gateway event"),
            }
        }
    });

    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown.shutdown();
        } else {
            warn!("failed to listen for interrupt");
        }
    });

    client.run().await?;
    info!(state = %handle.state(), "done");
    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    let config = GatewayConfig::new("");
    std::fs::write(output, config.to_toml()?)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Edit the file to add your token, then run:");
    println!("  elixus-gateway run --config {}", output.display());

    Ok(())
}
