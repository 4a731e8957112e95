use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::ingest::channel::DEFAULT_CHANNEL_CAPACITY;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub alpaca: AlpacaConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaConfig {
    pub paper_base_url: String,
    pub live_base_url: String,
    pub data_ws_url: String,
    #[serde(default = "default_feed")]
    pub feed: String,
    #[serde(skip)]
    pub api_key: String,
    #[serde(skip)]
    pub api_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedProvider {
    #[default]
    Alpaca,
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub provider: FeedProvider,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_simulated_interval_ms")]
    pub simulated_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    #[default]
    Mock,
    Paper,
    Live,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub mode: BrokerMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_feed() -> String {
    "iex".to_string()
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_simulated_interval_ms() -> u64 {
    500
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/trading_bot.db")
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            provider: FeedProvider::default(),
            symbols: Vec::new(),
            simulated_interval_ms: default_simulated_interval_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
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

impl AlpacaConfig {
    /// Trading REST base URL for the broker mode, `None` for the mock broker.
    pub fn trading_base_url(&self, mode: BrokerMode) -> Option<&str> {
        match mode {
            BrokerMode::Mock => None,
            BrokerMode::Paper => Some(self.paper_base_url.as_str()),
            BrokerMode::Live => Some(self.live_base_url.as_str()),
        }
    }
}

impl IngestConfig {
    /// Configured symbols, trimmed, upper-cased, without blanks or repeats.
    pub fn tradable_symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for sym in &self.symbols {
            let s = sym.trim().to_ascii_uppercase();
            if !s.is_empty() && !out.iter().any(|v| v == &s) {
                out.push(s);
            }
        }
        out
    }
}

fn check_url(field: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let url = url::Url::parse(value).with_context(|| format!("{} is not a valid URL", field))?;
    if !schemes.contains(&url.scheme()) {
        bail!(
            "{} must use one of {:?}, got '{}'",
            field,
            schemes,
            url.scheme()
        );
    }
    Ok(())
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("failed to parse config toml")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.channel_capacity == 0 {
            bail!("ingest.channel_capacity must be > 0");
        }
        if self.ingest.provider == FeedProvider::Simulated && self.ingest.simulated_interval_ms == 0 {
            bail!("ingest.simulated_interval_ms must be > 0");
        }
        if self.alpaca.feed.trim().is_empty() {
            bail!("alpaca.feed must not be empty");
        }
        check_url("alpaca.data_ws_url", &self.alpaca.data_ws_url, &["ws", "wss"])?;
        check_url("alpaca.paper_base_url", &self.alpaca.paper_base_url, &["http", "https"])?;
        check_url("alpaca.live_base_url", &self.alpaca.live_base_url, &["http", "https"])?;
        Ok(())
    }

    /// Whether any configured collaborator talks to Alpaca.
    pub fn needs_credentials(&self) -> bool {
        self.ingest.provider == FeedProvider::Alpaca || self.broker.mode != BrokerMode::Mock
    }

    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = std::env::var("TRADING_BOT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;

        let mut config = Self::from_toml_str(&config_str)
            .with_context(|| format!("invalid config {}", config_path.display()))?;

        if config.needs_credentials() {
            config.alpaca.api_key = std::env::var("APCA_API_KEY_ID")
                .context("APCA_API_KEY_ID not set in .env or environment")?;
            config.alpaca.api_secret = std::env::var("APCA_API_SECRET_KEY")
                .context("APCA_API_SECRET_KEY not set in .env or environment")?;
        }

        Ok(config)
    }
}
