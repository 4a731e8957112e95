use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::channel::{Enqueue, TickProducer};
use crate::error::IngestError;
use crate::model::tick::Tick;

/// Trade event as the transport hands it over, before it becomes a `Tick`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrade {
    pub symbol: String,
    pub price: f64,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
}

impl From<RawTrade> for Tick {
    fn from(trade: RawTrade) -> Self {
        Tick::new(trade.symbol, trade.price, trade.size, trade.timestamp)
    }
}

/// A push-based real-time trade feed.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Dispatch the long-lived connection on its own task and return.
    /// Only failures visible before dispatch are returned; later transport
    /// errors are logged by the connection task.
    fn connect(&self, ticks: TickProducer) -> Result<(), IngestError>;

    /// Add symbols to the subscription set. Valid once `connect` has been
    /// dispatched.
    async fn subscribe(&self, symbols: &[String]) -> Result<(), IngestError>;

    /// Cancel the connection. Callbacks become inert. Idempotent.
    fn close(&self);
}

/// Trade callback installed into a transport. Converts and enqueues
/// without ever waiting.
#[derive(Debug, Clone)]
pub struct TradeHandler {
    ticks: TickProducer,
    cancel: CancellationToken,
}

impl TradeHandler {
    pub fn new(ticks: TickProducer, cancel: CancellationToken) -> Self {
        Self { ticks, cancel }
    }

    pub fn on_trade(&self, trade: RawTrade) -> Enqueue {
        if self.cancel.is_cancelled() {
            return Enqueue::Closed;
        }
        self.ticks.try_enqueue(trade.into())
    }
}

/// Symbols subscribed so far. Grows only.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    inner: Arc<Mutex<BTreeSet<String>>>,
}

impl SubscriptionSet {
    /// Insert symbols and return the ones that were not present yet.
    pub fn insert_all(&self, symbols: &[String]) -> Vec<String> {
        let mut set = self.inner.lock();
        symbols
            .iter()
            .filter(|s| set.insert((*s).clone()))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lock().iter().cloned().collect()
    }
}

/// Trim, upper-case and dedup a symbol list. Rejects an empty list and
/// anything that is not a plausible ticker.
pub fn normalize_symbols(symbols: &[String]) -> Result<Vec<String>, IngestError> {
    if symbols.is_empty() {
        return Err(IngestError::Subscription("no symbols given".to_string()));
    }
    let mut out: Vec<String> = Vec::with_capacity(symbols.len());
    for raw in symbols {
        let sym = raw.trim().to_ascii_uppercase();
        if sym.is_empty() {
            return Err(IngestError::Subscription(
                "symbol must not be empty".to_string(),
            ));
        }
        let valid = sym.len() <= 21
            && sym
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '/' | '-'));
        if !valid {
            return Err(IngestError::Subscription(format!(
                "invalid symbol '{}'",
                raw.trim()
            )));
        }
        if !out.contains(&sym) {
            out.push(sym);
        }
    }
    Ok(out)
}
