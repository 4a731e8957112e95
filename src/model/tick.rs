use chrono::{DateTime, TimeZone, Utc};

/// A single trade print delivered by the market-data feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(
        symbol: impl Into<String>,
        price: f64,
        volume: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume,
            timestamp,
        }
    }

    /// Rebuild a tick from its stored form (epoch milliseconds).
    pub fn from_millis(
        symbol: impl Into<String>,
        price: f64,
        volume: u64,
        timestamp_ms: i64,
    ) -> Option<Self> {
        let timestamp = Utc.timestamp_millis_opt(timestamp_ms).single()?;
        Some(Self::new(symbol, price, volume, timestamp))
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}
