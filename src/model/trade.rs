use serde::{Deserialize, Serialize};

use super::order::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("closed") {
            TradeStatus::Closed
        } else {
            TradeStatus::Open
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub strategy: String,
    pub side: OrderSide,
    pub entry_price: f64,
    pub entry_time: i64,
    pub exit_price: Option<f64>,
    pub exit_time: Option<i64>,
    pub pnl: Option<f64>,
    pub status: TradeStatus,
}
