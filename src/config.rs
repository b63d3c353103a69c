use anyhow::{Context, Result};
use feed_core::{FeedConfig, Filter};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub relays: RelaysConfig,
    #[serde(default = "default_filters")]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelaysConfig {
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_preview_length")]
    pub preview_length: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_show_context")]
    pub show_context: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            preview_length: default_preview_length(),
            poll_interval_ms: default_poll_interval_ms(),
            show_context: default_show_context(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_filters() -> Vec<Filter> {
    vec![Filter::new().kinds(feed_core::event::NOTE_KINDS)]
}

fn default_preview_length() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_show_context() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let content = fs::read_to_string(expanded_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse TOML config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.relays.urls.is_empty() {
            anyhow::bail!("At least one relay URL is required");
        }

        for url in &self.relays.urls {
            if !url.starts_with("wss://") && !url.starts_with("ws://") {
                anyhow::bail!("Relay URL must start with ws:// or wss://: {}", url);
            }
        }

        if self.filters.is_empty() {
            anyhow::bail!("At least one filter is required");
        }
        for (i, filter) in self.filters.iter().enumerate() {
            filter
                .validate()
                .with_context(|| format!("Filter #{} is invalid", i + 1))?;
        }

        if self.feed.page_size == 0 || self.feed.take_size == 0 {
            anyhow::bail!("feed.page_size and feed.take_size must be positive");
        }

        if self.display.poll_interval_ms == 0 {
            anyhow::bail!("display.poll_interval_ms must be positive");
        }

        Ok(())
    }
}
