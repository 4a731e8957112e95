use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub pnl: f64,
}

impl Position {
    pub fn new(symbol: impl Into<String>, qty: f64, entry_price: f64, current_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            entry_price,
            current_price,
            pnl: (current_price - entry_price) * qty,
        }
    }
}
