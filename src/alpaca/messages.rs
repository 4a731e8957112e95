//! Wire types for the Alpaca market-data WebSocket (JSON codec).
//!
//! The server always sends JSON arrays of objects discriminated by `T`:
//! `success`, `error`, `subscription` and the data types (`t` for trades).
//! Quotes, bars and other data kinds are not requested and decode as `Other`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::source::RawTrade;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "T")]
pub enum StreamMessage {
    #[serde(rename = "success")]
    Success { msg: String },

    #[serde(rename = "error")]
    Error { code: i32, msg: String },

    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        trades: Vec<String>,
    },

    #[serde(rename = "t")]
    Trade(TradeMessage),

    #[serde(other)]
    Other,
}

/// `{"T":"t","S":"AAPL","i":52983525029461,"x":"V","p":150.05,"s":100,"t":"2024-01-02T15:04:05.123456789Z","c":["@"],"z":"C"}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeMessage {
    #[serde(rename = "S")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "s")]
    pub size: u64,
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
}

impl From<TradeMessage> for RawTrade {
    fn from(msg: TradeMessage) -> Self {
        RawTrade {
            symbol: msg.symbol,
            price: msg.price,
            size: msg.size,
            timestamp: msg.timestamp,
        }
    }
}

/// Codes 401..=404 mean the credentials were not accepted.
pub fn is_auth_error(code: i32) -> bool {
    matches!(code, 401..=404)
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest<'a> {
    pub action: &'static str,
    pub key: &'a str,
    pub secret: &'a str,
}

impl<'a> AuthRequest<'a> {
    pub fn new(key: &'a str, secret: &'a str) -> Self {
        Self {
            action: "auth",
            key,
            secret,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest<'a> {
    pub action: &'static str,
    pub trades: &'a [String],
}

impl<'a> SubscribeRequest<'a> {
    pub fn trades(symbols: &'a [String]) -> Self {
        Self {
            action: "subscribe",
            trades: symbols,
        }
    }
}

/// Decode one text frame. Alpaca batches messages in arrays but a bare
/// object is accepted too. Only a frame that is not JSON at all is an
/// error; an element that does not decode is logged and skipped so the
/// rest of the batch still gets through.
pub fn decode_frame(text: &str) -> serde_json::Result<Vec<StreamMessage>> {
    let items = match serde_json::from_str::<serde_json::Value>(text)? {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    let messages = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<StreamMessage>(item) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable stream message");
                None
            }
        })
        .collect();
    Ok(messages)
}
