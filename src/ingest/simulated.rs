use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use super::channel::TickProducer;
use super::source::{normalize_symbols, RawTrade, StreamSource, SubscriptionSet, TradeHandler};
use crate::error::IngestError;

/// Offline feed: a random walk per subscribed symbol, one print per symbol
/// every `interval`.
pub struct SimulatedSource {
    interval: Duration,
    cancel: CancellationToken,
    subscriptions: SubscriptionSet,
    connected: AtomicBool,
}

impl SimulatedSource {
    pub fn new(interval: Duration, parent: &CancellationToken) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            cancel: parent.child_token(),
            subscriptions: SubscriptionSet::default(),
            connected: AtomicBool::new(false),
        }
    }
}

/// Stable starting price derived from the symbol so restarts look alike.
fn seed_price(symbol: &str) -> f64 {
    let sum: u32 = symbol.bytes().map(u32::from).sum();
    50.0 + f64::from(sum % 450)
}

#[async_trait]
impl StreamSource for SimulatedSource {
    fn connect(&self, ticks: TickProducer) -> Result<(), IngestError> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Connection("simulated feed is closed".to_string()));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(IngestError::Connection(
                "simulated feed already connected".to_string(),
            ));
        }

        let handler = TradeHandler::new(ticks, self.cancel.clone());
        let subscriptions = self.subscriptions.clone();
        let cancel = self.cancel.clone();
        let period = self.interval;
        tokio::spawn(async move {
            let seed = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
            let mut rng = StdRng::seed_from_u64(seed);
            let mut prices: HashMap<String, f64> = HashMap::new();
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                for symbol in subscriptions.snapshot() {
                    let price = prices
                        .entry(symbol.clone())
                        .or_insert_with(|| seed_price(&symbol));
                    let step: f64 = rng.random_range(-0.001..0.001);
                    *price = (*price * (1.0 + step)).max(0.01);
                    let trade = RawTrade {
                        symbol,
                        price: (*price * 100.0).round() / 100.0,
                        size: rng.random_range(1..500),
                        timestamp: Utc::now(),
                    };
                    handler.on_trade(trade);
                }
            }
            tracing::info!("Simulated feed stopped");
        });
        tracing::info!(interval_ms = period.as_millis() as u64, "Simulated feed started");
        Ok(())
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<(), IngestError> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Subscription("simulated feed is closed".to_string()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(IngestError::Subscription("not connected".to_string()));
        }
        let symbols = normalize_symbols(symbols)?;
        self.subscriptions.insert_all(&symbols);
        Ok(())
    }

    fn close(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
        }
    }
}
