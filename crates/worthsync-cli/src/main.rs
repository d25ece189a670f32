//! worthsync - headless live dashboard.
//!
//! Subscribes to the dashboard resource, keeps it fresh from the backend's
//! push channel, and prints every snapshot it receives until Ctrl-C.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use worthsync_core::{
    DispatchTable, Dispatcher, RealtimeChannel, Resources, Snapshot, Store, SyncConfig,
    WsConnector,
};

const USAGE: &str = "Usage: worthsync [--verbose] [--origin <url>]";

#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    verbose: bool,
    origin: Option<String>,
    help: bool,
}

fn parse_args<I>(args: I) -> Result<Args>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-v" | "--verbose" => parsed.verbose = true,
            "-h" | "--help" => parsed.help = true,
            "--origin" => {
                let origin = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--origin needs a value\n{}", USAGE))?;
                parsed.origin = Some(origin);
            }
            other => bail!("Unknown argument: {}\n{}", other, USAGE),
        }
    }
    Ok(parsed)
}

/// Initialize the tracing subscriber for logging
fn init_tracing(verbose: bool) {
    // RUST_LOG wins; otherwise warn, or debug with --verbose
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn render_snapshot(snapshot: &Snapshot<Value>) -> String {
    let refreshing = if snapshot.is_validating { " (refreshing)" } else { "" };

    if snapshot.is_loading() {
        return format!("[{}] loading...", snapshot.key);
    }
    match (&snapshot.data, &snapshot.error) {
        (Some(data), Some(error)) => format!(
            "[{}] error: {} - showing data from {}: {}",
            snapshot.key,
            error,
            snapshot.age_display(),
            data
        ),
        (None, Some(error)) => format!("[{}] error: {}", snapshot.key, error),
        (Some(data), None) => format!(
            "[{}] updated {}{}: {}",
            snapshot.key,
            snapshot.age_display(),
            refreshing,
            data
        ),
        (None, None) => format!("[{}] no data{}", snapshot.key, refreshing),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }

    init_tracing(args.verbose);
    info!("worthsync starting");

    let mut config = SyncConfig::load().context("Failed to load configuration")?;
    if let Some(origin) = args.origin {
        config.origin = origin;
    }

    let resources = Resources::from_config(&config, Store::global().clone())
        .context("Failed to set up API client")?;
    let push_url = config.push_url().context("Failed to derive push endpoint")?;
    info!(origin = %config.origin, push_url = %push_url, "Configured");

    let _dashboard = resources.use_dashboard(|snapshot| println!("{}", render_snapshot(snapshot)));

    let dispatcher = Arc::new(Dispatcher::new(
        DispatchTable::baseline(),
        Arc::new(resources.revalidator().clone()),
    ));
    let channel = RealtimeChannel::spawn(
        push_url,
        Arc::new(WsConnector),
        dispatcher,
        config.reconnect_delay(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    channel.stop().await;
    info!("worthsync shutting down");
    Ok(())
}
