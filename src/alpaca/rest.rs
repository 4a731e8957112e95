use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;

use crate::broker::Broker;
use crate::model::order::{OrderAck, OrderRequest};
use crate::model::position::Position;

/// Alpaca trading REST API (paper or live, chosen by base URL).
pub struct AlpacaRestClient {
    http: reqwest::Client,
    trading_base_url: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaAccountResponse {
    equity: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    filled_avg_price: Option<String>,
    #[serde(default)]
    qty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaPositionResponse {
    symbol: String,
    qty: String,
    avg_entry_price: String,
    #[serde(default)]
    current_price: Option<String>,
    #[serde(default)]
    unrealized_pl: Option<String>,
}

fn parse_num(field: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .with_context(|| format!("alpaca field '{}' is not a number: '{}'", field, value))
}

impl AlpacaRestClient {
    pub fn new(trading_base_url: &str, api_key: &str, api_secret: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("APCA-API-KEY-ID", HeaderValue::from_str(api_key)?);
        headers.insert("APCA-API-SECRET-KEY", HeaderValue::from_str(api_secret)?);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build Alpaca HTTP client")?;
        Ok(Self {
            http,
            trading_base_url: trading_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn compact_error_body(body: &str) -> String {
        let normalized = body.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.len() > 180 {
            let mut cut = 180;
            while !normalized.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &normalized[..cut])
        } else {
            normalized
        }
    }

    pub async fn get_account_equity(&self) -> Result<f64> {
        let url = format!("{}/v2/account", self.trading_base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("alpaca get account HTTP failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!(
                "alpaca get account failed ({}): {}",
                status,
                Self::compact_error_body(&body)
            );
        }
        let account: AlpacaAccountResponse = response
            .json()
            .await
            .context("alpaca account JSON parse failed")?;
        if let Some(status) = account.status.as_deref() {
            tracing::debug!(status, "alpaca account status");
        }
        parse_num("equity", &account.equity)
    }

    pub async fn place_market_order_qty(
        &self,
        symbol: &str,
        side: &str,
        qty: f64,
    ) -> Result<OrderAck> {
        let url = format!("{}/v2/orders", self.trading_base_url);
        let body = serde_json::json!({
            "symbol": symbol,
            "side": side,
            "type": "market",
            "time_in_force": "day",
            "qty": format!("{:.4}", qty.max(0.0)),
        });
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("alpaca place market qty order HTTP failed")?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("alpaca order rejected: {}", Self::compact_error_body(&body));
        }
        let order: AlpacaOrderResponse = response
            .json()
            .await
            .context("alpaca order response parse failed")?;
        Ok(OrderAck {
            id: order.id,
            status: order.status,
            qty: order.qty.and_then(|v| v.parse::<f64>().ok()),
            filled_avg_price: order.filled_avg_price.and_then(|v| v.parse::<f64>().ok()),
        })
    }

    pub async fn list_positions(&self) -> Result<Vec<Position>> {
        let url = format!("{}/v2/positions", self.trading_base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("alpaca list positions HTTP failed")?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "alpaca list positions failed: {}",
                Self::compact_error_body(&body)
            );
        }
        let rows: Vec<AlpacaPositionResponse> = response
            .json()
            .await
            .context("alpaca positions JSON parse failed")?;

        rows.into_iter().map(position_from_row).collect()
    }
}

fn position_from_row(row: AlpacaPositionResponse) -> Result<Position> {
    let qty = parse_num("qty", &row.qty)?;
    let entry_price = parse_num("avg_entry_price", &row.avg_entry_price)?;
    let current_price = match row.current_price.as_deref() {
        Some(v) => parse_num("current_price", v)?,
        None => entry_price,
    };
    let mut position = Position::new(row.symbol, qty, entry_price, current_price);
    if let Some(pl) = row.unrealized_pl.as_deref() {
        position.pnl = parse_num("unrealized_pl", pl)?;
    }
    Ok(position)
}

#[async_trait]
impl Broker for AlpacaRestClient {
    fn name(&self) -> &'static str {
        "alpaca"
    }

    async fn account_balance(&self) -> Result<f64> {
        self.get_account_equity().await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        self.place_market_order_qty(&order.symbol, order.side.as_alpaca_str(), order.qty)
            .await
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        self.list_positions().await
    }
}
