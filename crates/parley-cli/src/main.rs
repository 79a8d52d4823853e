//! Parley terminal client entry point.
//!
//! # Usage
//!
//! ```bash
//! # Local development server
//! parley
//!
//! # Remote server, verbose logs on stderr
//! parley --api-url https://chat.example.com/api --push-url wss://chat.example.com/ws --log-level debug
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use parley_cli::{FileCredentialStore, Runtime, SystemEnv, TerminalDriver};
use parley_client::{ClientConfig, config::DEFAULT_TYPING_TIMEOUT};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley chat client
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Terminal client for the Parley chat service")]
#[command(version)]
struct Args {
    /// Base URL of the persistence API
    #[arg(long, default_value = "http://localhost:5000/api")]
    api_url: String,

    /// URL of the push channel
    #[arg(long, default_value = "ws://localhost:5000/ws")]
    push_url: String,

    /// Credential file (defaults to the platform config dir)
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Idle time before a typing indicator is withdrawn
    #[arg(long, default_value_t = DEFAULT_TYPING_TIMEOUT.as_millis() as u64)]
    typing_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // stdout belongs to the conversation
    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    let store = FileCredentialStore::new(args.credentials.unwrap_or_else(FileCredentialStore::default_path));
    tracing::info!(credentials = %store.path().display(), api = %args.api_url, "Parley starting");

    let config =
        ClientConfig { typing_timeout: Duration::from_millis(args.typing_timeout_ms), ..ClientConfig::default() };
    let driver = TerminalDriver::new(&args.api_url, args.push_url)?;

    Runtime::new(driver, SystemEnv::new(), store, config).run().await?;

    Ok(())
}
