//! inplay-feed: stream decoded topic updates from the in-play odds feed.
//!
//! Fetches a session token, opens the feed WebSocket, subscribes to the
//! configured topics and prints one JSON line per topic update on stdout.
//! Ctrl+C closes the connection and prints a session summary.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use inplay_feed::bootstrap::SessionBootstrapper;
use inplay_feed::config::{AppConfig, CONFIG_PATH, CONFIG_PATH_ENV, FrameOrder};
use inplay_feed::http::HttpClient;
use inplay_feed::reporter;
use inplay_feed::session::{ProtocolSession, sink_fn};
use inplay_feed::transport::WsConnector;

#[derive(Parser)]
#[command(name = "inplay-feed", about = "Stream topic updates from the in-play odds feed")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, env = CONFIG_PATH_ENV, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Decode frames of each payload last-to-first
    #[arg(long)]
    reverse_frames: bool,

    /// Topic to subscribe to (repeatable, replaces the configured list)
    #[arg(long = "topic")]
    topics: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = if args.config.exists() {
        let config = AppConfig::load(&args.config)?;
        info!("Loaded config from {}", args.config.display());
        config
    } else {
        info!("{} not found, using defaults", args.config.display());
        AppConfig::default()
    };
    if args.reverse_frames {
        config.feed.frame_order = FrameOrder::Reverse;
    }
    if !args.topics.is_empty() {
        config.feed.topics = args.topics;
    }

    if let Err(e) = config.validate() {
        error!("Feed unavailable: {e}");
        return Ok(());
    }
    let headers = config.header_map()?;

    let http = HttpClient::new(headers.clone(), config.http.clone())?;
    let bootstrapper = SessionBootstrapper::new(http, config.feed.session_url.clone());
    let connector = WsConnector::new(config.feed.connection_url.clone(), headers);
    let topics: Vec<String> = config
        .feed
        .topics
        .iter()
        .filter(|t| !t.trim().is_empty())
        .cloned()
        .collect();

    let mut session = ProtocolSession::new(connector, bootstrapper, topics, config.feed.frame_order);
    info!(
        "Starting feed, topics={:?} frame_order={:?}",
        session.topics(),
        config.feed.frame_order
    );

    let handle = session.disconnect_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            handle.disconnect();
        }
    });

    let summary = session
        .connect(sink_fn(|update| reporter::report_update(&update)))
        .await;
    reporter::report_summary(&summary);

    Ok(())
}
