use serde::{Deserialize, Serialize};

/// A strategy decision recorded for later review. Nothing in this crate
/// produces signals yet; the table exists so a strategy can be attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub timestamp_ms: i64,
    pub symbol: String,
    pub signal_type: String,
    pub indicators: Option<String>,
    pub action_taken: Option<String>,
}
