mod server;
mod websocket;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use smartc_core::{logging, Config};
use smartc_hub::SignalingHub;

use server::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "smartc")]
#[command(about = "SmaRTC signaling server", version)]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(long, short, env = "SMARTC_CONFIG_PATH", default_value = "config.yaml")]
    config: String,

    /// Override the listen host
    #[arg(long, env = "SMARTC_HOST")]
    host: Option<String>,

    /// Override the HTTP/WebSocket port
    #[arg(long, env = "SMARTC_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = Config::load(Some(args.config.as_str()))?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.http_port = port;
    }

    // 2. Validate (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("SmaRTC signal server starting...");
    info!("HTTP address: {}", config.http_address());

    // 4. Signaling hub and its sweeps
    let hub = Arc::new(SignalingHub::new(&config));
    hub.start_background_tasks();

    // 5. Serve until shutdown
    SignalServer::new(config, hub).start().await
}
