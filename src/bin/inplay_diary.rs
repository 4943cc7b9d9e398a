//! inplay-diary: fetch and print the in-play diary document.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use inplay_feed::config::{AppConfig, CONFIG_PATH, CONFIG_PATH_ENV};
use inplay_feed::diary::fetch_inplay_diary;
use inplay_feed::http::HttpClient;
use inplay_feed::reporter;

#[derive(Parser)]
#[command(name = "inplay-diary", about = "Fetch the in-play diary document")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, env = CONFIG_PATH_ENV, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Diary endpoint, overriding `diary.url`
    #[arg(long)]
    url: Option<String>,
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
    let mut config = AppConfig::load(&args.config)?;
    info!("Loaded config from {}", args.config.display());
    if args.url.is_some() {
        config.diary.url = args.url;
    }
    config.validate()?;

    let url = config
        .diary
        .url
        .clone()
        .context("diary.url is not configured")?;
    let http = HttpClient::new(config.header_map()?, config.http.clone())?;
    let document = fetch_inplay_diary(&http, &url).await?;
    reporter::report_document(&document);

    Ok(())
}
