use anyhow::Result;
use async_trait::async_trait;

use crate::model::order::{OrderAck, OrderRequest};
use crate::model::position::Position;

pub mod mock;

pub use mock::MockBroker;

/// Brokerage capability used by the app.
#[async_trait]
pub trait Broker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Total account equity (cash plus positions).
    async fn account_balance(&self) -> Result<f64>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    async fn positions(&self) -> Result<Vec<Position>>;
}
