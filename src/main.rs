use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feed_core::nostr_sdk::prelude::{Client, Filter as SdkFilter};
use feed_core::{
    Feed, FeedDeps, FeedOptions, ProfileCache, ProfileLoader, RelayNetwork, TagHints,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod render;

use config::Config;
use render::Renderer;

#[derive(Parser)]
#[command(name = "snowfeed")]
#[command(about = "Threaded Nostr feed aggregated from many relays")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "snowfeed.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream the feed to the terminal
    Run,
    /// Test configuration and relay connectivity
    Test,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::Version = command {
        println!("snowfeed v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    init_logging(&config.logging.level)?;

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    match command {
        Commands::Run => run_feed(config).await,
        Commands::Test => test_config(&config).await,
        Commands::Version => Ok(()),
    }
}

async fn connect(urls: &[String]) -> Result<Client> {
    let client = Client::default();
    for url in urls {
        client
            .add_relay(url.as_str())
            .await
            .with_context(|| format!("Failed to add relay: {}", url))?;
    }
    client.connect().await;
    tracing::info!("Connected to {} relay(s)", urls.len());
    Ok(client)
}

async fn run_feed(config: Config) -> Result<()> {
    tracing::info!("Starting snowfeed v{}", env!("CARGO_PKG_VERSION"));

    let client = connect(&config.relays.urls).await?;
    let network = Arc::new(
        RelayNetwork::new(client.clone()).with_timeout(config.feed.fetch_timeout()),
    );
    let profiles = Arc::new(ProfileCache::new());
    let loader = ProfileLoader::new(
        network.clone(),
        profiles.clone(),
        config.relays.urls.clone(),
    );

    let feed = Feed::new(
        FeedOptions {
            relays: config.relays.urls.clone(),
            filters: config.filters.clone(),
            config: config.feed.clone(),
        },
        FeedDeps {
            network,
            hints: Arc::new(TagHints::new(config.relays.urls.clone())),
            pubkeys: Arc::new(loader),
        },
    );
    feed.start().with_context(|| "Failed to start feed")?;

    let renderer = Renderer::new(config.display.clone(), profiles);
    let mut printed = 0;
    let mut ticker = tokio::time::interval(Duration::from_millis(config.display.poll_interval_ms));
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = feed.load().await {
                    tracing::warn!("Skipping feed load: {}", e);
                    continue;
                }
                let entries = feed.feed().get();
                for entry in entries.iter().skip(printed) {
                    println!("{}", renderer.render(entry));
                }
                printed = entries.len();
            }
        }
    }

    tracing::info!(stats = ?feed.stats(), "Received shutdown signal, stopping feed...");
    feed.stop();
    client.disconnect().await;

    Ok(())
}

async fn test_config(config: &Config) -> Result<()> {
    println!("Testing configuration...");
    println!("✓ Configuration is valid");
    println!("  Relays:  {}", config.relays.urls.len());
    println!("  Filters: {}", config.filters.len());

    let client = connect(&config.relays.urls).await?;
    let probe = SdkFilter::new().limit(1);
    for url in &config.relays.urls {
        match client
            .fetch_events_from([url.as_str()], probe.clone(), Duration::from_secs(5))
            .await
        {
            Ok(_) => println!("✓ {} answered", url),
            Err(e) => {
                println!("⚠ {} did not answer: {}", url, e);
                println!("  (This is non-fatal, the feed skips silent relays)");
            }
        }
    }
    client.disconnect().await;

    println!("\nConfiguration test completed successfully!");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    // Wait for either SIGTERM or SIGINT
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        },
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C");
        }
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter.to_string())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();

    Ok(())
}
