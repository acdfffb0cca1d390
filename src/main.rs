/// Messenger Client - Main entry point
///
/// A terminal client for the messenger services
use anyhow::Context;
use clap::Parser;
use log::info;
use messenger_client::{cli, ClientConfig, ClientManager};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "messenger")]
#[command(about = "Messenger Client - terminal chat over the messenger services")]
struct Args {
    /// Auth service URL (overrides the build-time default)
    #[arg(long)]
    auth_url: Option<String>,

    /// User service URL (overrides the build-time default)
    #[arg(long)]
    user_url: Option<String>,

    /// Message service URL (overrides the build-time default)
    #[arg(long)]
    message_url: Option<String>,

    /// Realtime WebSocket endpoint (overrides the build-time default)
    #[arg(long)]
    ws_url: Option<String>,

    /// Use one base URL for every REST service
    #[arg(long, conflicts_with_all = ["auth_url", "user_url", "message_url"])]
    api_base: Option<String>,

    /// Timeout for REST requests, in seconds (none by default)
    #[arg(long)]
    timeout: Option<u64>,

    /// Config directory for the session database (default: ~/.messenger)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging (DEBUG level)
    #[arg(short, long)]
    verbose: bool,
}

fn build_config(args: Args) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::default();

    if let Some(base) = args.api_base.as_deref() {
        config = config.with_api_base(base);
    }
    if let Some(url) = args.auth_url {
        config.auth_url = url;
    }
    if let Some(url) = args.user_url {
        config.user_url = url;
    }
    if let Some(url) = args.message_url {
        config.message_url = url;
    }
    if let Some(url) = args.ws_url {
        config.ws_url = url;
    }
    config.request_timeout = args.timeout.map(Duration::from_secs);

    let data_dir = match args.config {
        Some(dir) => dir,
        None => {
            let base_dirs =
                directories::BaseDirs::new().context("Failed to get home directory")?;
            base_dirs.home_dir().join(".messenger")
        }
    };
    Ok(config.with_data_dir(data_dir))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    let config = build_config(args)?;

    info!("Starting Messenger Client");
    info!("Auth service: {}", config.auth_url);
    info!("User service: {}", config.user_url);
    info!("Message service: {}", config.message_url);
    info!("WebSocket: {}", config.ws_url);
    if let Some(dir) = &config.data_dir {
        info!("Config directory: {}", dir.display());
    }

    let mut manager = ClientManager::new(config).context("Failed to initialize client")?;

    cli::run_client_loop(&mut manager)
        .await
        .context("Client loop failed")?;

    Ok(())
}
