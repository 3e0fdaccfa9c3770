//! email-gate
//!
//! Sidecar that enforces a header-carried email identity in front of an LLM
//! gateway.
//!
//! ```text
//!     Client ──▶ request id ──▶ timeout ──▶ gate ──▶ body limit ──▶ upstream
//!                                            │
//!                                 401 / 403 ◀┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use email_gate::config::watcher::ConfigWatcher;
use email_gate::config::{load_config, load_config_with, GatewayConfig, Overrides};
use email_gate::observability::{logging, metrics};
use email_gate::security::RequestGate;
use email_gate::{GatewayServer, Shutdown};

#[derive(Parser)]
#[command(name = "email-gate")]
#[command(about = "Header-based email identity gate for LLM gateways", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gate in front of the upstream gateway
    Serve {
        /// Override listener.bind_address
        #[arg(long)]
        bind: Option<String>,

        /// Override upstream.address
        #[arg(long)]
        upstream: Option<String>,
    },
    /// Evaluate a single request offline and print the decision
    Check {
        /// Request path
        #[arg(long)]
        path: String,

        /// Value of the identity header; omit to simulate a missing header
        #[arg(long)]
        email: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, upstream } => {
            let overrides = Overrides {
                bind_address: bind,
                upstream_address: upstream,
            };
            serve(cli.config, overrides).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { path, email } => {
            let config = match &cli.config {
                Some(path) => load_config(path)?,
                None => GatewayConfig::default(),
            };
            check(&config, &path, email.as_deref())
        }
    }
}

async fn serve(
    config_path: Option<PathBuf>,
    overrides: Overrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &config_path {
        Some(path) => load_config_with(path, &overrides)?,
        None => overrides.resolve(GatewayConfig::default())?,
    };

    logging::init(&config.observability.log_level);
    tracing::info!("email-gate v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        header = %config.gate.header,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher alive for the lifetime of the server.
    let (_watcher, config_updates) = match config_path {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(&path, overrides);
            (Some(watcher.run()?), rx)
        }
        None => {
            let (_, rx) = mpsc::unbounded_channel();
            (None, rx)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(shutdown.clone().trigger_on_ctrl_c());

    let server = GatewayServer::new(config)?;
    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn check(
    config: &GatewayConfig,
    path: &str,
    email: Option<&str>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let gate = RequestGate::new(&config.gate)?;
    let (report, allowed) = gate.evaluate_email(path, email)?.report();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if allowed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
