use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::alpaca::{AlpacaRestClient, AlpacaStreamClient};
use crate::auth;
use crate::broker::{Broker, MockBroker};
use crate::config::{Config, FeedProvider};
use crate::error::AppError;
use crate::ingest::{IngestPipeline, PipelineStats, SimulatedSource, StreamSource};
use crate::model::order::{OrderAck, OrderRequest, OrderSide};
use crate::model::position::Position;
use crate::model::trade::{Trade, TradeStatus};
use crate::model::user::{User, UserSettings};
use crate::store::SqliteStore;

const SEARCH_UNIVERSE: &[&str] = &[
    "AAPL", "GOOGL", "MSFT", "TSLA", "AMZN", "META", "NFLX", "NVDA", "AMD", "INTC",
];
const SEARCH_LIMIT: usize = 5;
const MANUAL_STRATEGY: &str = "Manual";

/// Owns every collaborator the boundary layer needs.
pub struct App {
    broker: Arc<dyn Broker>,
    store: Arc<SqliteStore>,
    pipeline: IngestPipeline,
    lifetime: CancellationToken,
}

impl App {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<SqliteStore>,
        pipeline: IngestPipeline,
        lifetime: CancellationToken,
    ) -> Self {
        Self {
            broker,
            store,
            pipeline,
            lifetime,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let lifetime = CancellationToken::new();

        let store = Arc::new(
            SqliteStore::open(&config.storage.db_path).context("failed to open store")?,
        );

        let broker: Arc<dyn Broker> = match config.alpaca.trading_base_url(config.broker.mode) {
            Some(base_url) => Arc::new(AlpacaRestClient::new(
                base_url,
                &config.alpaca.api_key,
                &config.alpaca.api_secret,
            )?),
            None => Arc::new(MockBroker::new()),
        };

        let source: Arc<dyn StreamSource> = match config.ingest.provider {
            FeedProvider::Alpaca => Arc::new(AlpacaStreamClient::new(
                &config.alpaca.data_ws_url,
                &config.alpaca.feed,
                &config.alpaca.api_key,
                &config.alpaca.api_secret,
                &lifetime,
            )),
            FeedProvider::Simulated => Arc::new(SimulatedSource::new(
                Duration::from_millis(config.ingest.simulated_interval_ms),
                &lifetime,
            )),
        };

        let pipeline = IngestPipeline::new(source, store.clone(), config.ingest.channel_capacity);

        tracing::info!(
            broker = broker.name(),
            provider = ?config.ingest.provider,
            db_path = %config.storage.db_path.display(),
            capacity = config.ingest.channel_capacity,
            "App initialised"
        );

        Ok(Self::new(broker, store, pipeline, lifetime))
    }

    pub fn greet(&self, name: &str) -> String {
        format!("Hello {}, It's show time!", name)
    }

    pub async fn account_balance(&self) -> Result<f64, AppError> {
        self.broker.account_balance().await.map_err(AppError::Broker)
    }

    /// Start (or extend) the market stream. The result is a status line for
    /// display, never an error value.
    pub async fn start_market_stream(&self, symbol: &str) -> String {
        let symbol = symbol.trim().to_ascii_uppercase();
        match self.pipeline.start(std::slice::from_ref(&symbol)).await {
            Ok(()) => format!("Started streaming {}", symbol),
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "Stream start failed");
                format!("Error starting stream: {}", e)
            }
        }
    }

    pub fn stream_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn register(&self, email: &str, password: &str) -> Result<User, AppError> {
        let email = auth::normalize_email(email);
        auth::validate_credentials(&email, password).map_err(AppError::Validation)?;
        if self
            .store
            .user_by_email(&email)
            .map_err(AppError::Storage)?
            .is_some()
        {
            return Err(AppError::Conflict("email already exists".to_string()));
        }
        let hash = auth::hash_password(password).map_err(AppError::Internal)?;
        self.store
            .create_user(&email, &hash)
            .map_err(AppError::Storage)?;
        let user = self
            .store
            .user_by_email(&email)
            .map_err(AppError::Storage)?
            .ok_or_else(|| AppError::Storage(anyhow::anyhow!("user vanished after insert")))?;
        tracing::info!(user_id = user.id, "User registered");
        Ok(user)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<User, AppError> {
        let invalid = || AppError::Auth("invalid email or password".to_string());
        let email = auth::normalize_email(email);
        let user = self
            .store
            .user_by_email(&email)
            .map_err(AppError::Storage)?
            .ok_or_else(invalid)?;
        if !auth::verify_password(password, &user.password_hash) {
            return Err(invalid());
        }
        Ok(user)
    }

    pub fn save_settings(&self, settings: &UserSettings) -> Result<(), AppError> {
        let theme = settings.theme.as_str();
        if !matches!(theme, "dark" | "light") {
            return Err(AppError::Validation(format!(
                "unknown theme '{}', expected dark or light",
                theme
            )));
        }
        self.store
            .save_settings(settings)
            .map_err(AppError::Storage)
    }

    pub fn settings(&self, user_id: i64) -> Result<UserSettings, AppError> {
        self.store.settings(user_id).map_err(AppError::Storage)
    }

    /// Prefix match over a fixed universe, case-insensitive, at most five.
    pub fn search_stocks(&self, query: &str) -> Vec<String> {
        let query = query.trim().to_ascii_uppercase();
        SEARCH_UNIVERSE
            .iter()
            .filter(|s| s.starts_with(query.as_str()))
            .take(SEARCH_LIMIT)
            .map(|s| s.to_string())
            .collect()
    }

    pub async fn place_order(
        &self,
        symbol: &str,
        qty: f64,
        side: &str,
    ) -> Result<OrderAck, AppError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(AppError::Validation("symbol must not be empty".to_string()));
        }
        if !(qty.is_finite() && qty > 0.0) {
            return Err(AppError::Validation("qty must be > 0".to_string()));
        }
        let side: OrderSide = side.parse().map_err(AppError::Validation)?;

        let request = OrderRequest {
            symbol: symbol.clone(),
            qty,
            side,
        };
        let ack = self
            .broker
            .place_order(&request)
            .await
            .map_err(AppError::Broker)?;

        let trade = Trade {
            id: ack.id.clone(),
            symbol,
            strategy: MANUAL_STRATEGY.to_string(),
            side,
            entry_price: ack.filled_avg_price.unwrap_or(0.0),
            entry_time: chrono::Utc::now().timestamp(),
            exit_price: None,
            exit_time: None,
            pnl: None,
            status: TradeStatus::Open,
        };
        if let Err(e) = self.store.save_trade(&trade) {
            tracing::warn!(order_id = %ack.id, error = %format!("{:#}", e), "Failed to record trade");
        }
        Ok(ack)
    }

    pub async fn portfolio(&self) -> Result<Vec<Position>, AppError> {
        self.broker.positions().await.map_err(AppError::Broker)
    }

    pub fn recent_trades(&self, limit: usize) -> Result<Vec<Trade>, AppError> {
        self.store.recent_trades(limit).map_err(AppError::Storage)
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// Application teardown: stop ingestion, wait for the consumer to drain,
    /// then cancel everything derived from the app lifetime.
    pub async fn shutdown(&self) {
        self.pipeline.shutdown().await;
        self.lifetime.cancel();
        tracing::info!(stats = ?self.pipeline.stats(), "App shut down");
    }
}
