// ABOUTME: tidal-client binary - streams messages from a bidirectional gRPC server
// ABOUTME: Modes: auto_cancel (single session), simple and reliable (with reconnection)

mod config;
mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tidal_stream::{GrpcTransport, Wire};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

use crate::config::ClientConfig;
use crate::run::{Mode, Overrides, Settings};

#[derive(Parser)]
#[command(name = "tidal-client")]
#[command(about = "Bidirectional streaming client with auto-cancel, reconnection and acks")]
struct Cli {
    /// Behavior to run: auto_cancel, simple or reliable
    #[arg(long, default_value = "auto_cancel")]
    mode: String,

    /// Seconds before auto_cancel mode cancels the stream
    #[arg(long, default_value_t = 3.0)]
    delay: f64,

    /// Server address (default: $GRPC_SERVER_ADDRESS, then [::1]:50051)
    #[arg(short, long)]
    server: Option<String>,

    /// Probability of withholding an ack in reliable mode
    #[arg(long)]
    drop_probability: Option<f64>,

    /// Seed for reproducible ack drops
    #[arg(long)]
    seed: Option<u64>,

    /// Connection attempts allowed before giving up
    #[arg(long)]
    max_retries: Option<u32>,

    /// Message schema: framed (cancel server) or envelope (ack server). Defaults per mode
    #[arg(long)]
    wire: Option<Wire>,

    /// Load configuration from a file (default: ~/.config/tidal/client.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tidal_log::init_with_level(Level::DEBUG);
    } else {
        tidal_log::init();
    }

    let mode = match cli.mode.parse::<Mode>() {
        Ok(mode) => mode,
        Err(e) => {
            error!(error = %e, "invalid mode");
            std::process::exit(1);
        }
    };

    let file = ClientConfig::load(cli.config.as_deref()).context("failed to load client config")?;
    let overrides = Overrides {
        server: cli.server,
        delay_secs: cli.delay,
        drop_probability: cli.drop_probability,
        seed: cli.seed,
        max_retries: cli.max_retries,
        wire: cli.wire,
    };
    let settings = Settings::build(mode, &overrides, &file).context("invalid settings")?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            ctrl_c.cancel();
        }
    });

    let transport = GrpcTransport::new(settings.channel.clone()).with_wire(settings.wire);
    run::execute(&settings, Arc::new(transport), shutdown).await;
    Ok(())
}
