use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::Broker;
use crate::model::order::{OrderAck, OrderRequest};
use crate::model::position::Position;

const MOCK_EQUITY: f64 = 10_000.50;

/// Canned account for running without brokerage credentials.
/// Orders are acknowledged and remembered, never executed.
#[derive(Debug, Default)]
pub struct MockBroker {
    orders: Mutex<Vec<OrderRequest>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().clone()
    }
}

#[async_trait]
impl Broker for MockBroker {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn account_balance(&self) -> Result<f64> {
        Ok(MOCK_EQUITY)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        tracing::info!(
            symbol = %order.symbol,
            qty = order.qty,
            side = %order.side,
            "Mock order accepted"
        );
        self.orders.lock().push(order.clone());
        Ok(OrderAck {
            id: uuid::Uuid::new_v4().to_string(),
            status: "accepted".to_string(),
            qty: Some(order.qty),
            filled_avg_price: None,
        })
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        Ok(vec![
            Position::new("AAPL", 10.0, 150.0, 155.0),
            Position::new("TSLA", 5.0, 700.0, 690.0),
        ])
    }
}
