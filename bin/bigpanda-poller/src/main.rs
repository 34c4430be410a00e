//! Entrypoint.

use clap::Parser;
use config::{Opts, PollConfig};
use dotenvy::dotenv;
use incident::{Event, Poller};
use runtime::shutdown::ShutdownSignal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

/// Capacity of the queue between the poller and the stdout printer.
const QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    if let Ok(custom_env_file) = std::env::var("ENV_FILE") {
        dotenvy::from_filename(custom_env_file)?;
    } else {
        // Try the default .env file, and ignore if it doesn't exist.
        dotenv().ok();
    }

    let config = PollConfig::from(Opts::parse());

    // stdout carries the events, diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        environment_id = %config.environment_id,
        mode = ?config.mode,
        interval_secs = config.interval,
        "🐼 BigPanda poller starting..."
    );

    let poller = Poller::from_config(&config)?;
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let printer = tokio::spawn(print_events(rx));

    poller.run_until(tx, ShutdownSignal::new()?).await?;
    printer.await?;
    Ok(())
}

/// Print every event as one JSON line until the poller drops its sender.
async fn print_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => error!(%e, "failed to serialize event"),
        }
    }
}
