use crate::error::IngestError;
use crate::model::tick::Tick;

/// Durable append of one tick at a time.
pub trait TickSink: Send + Sync {
    fn log_tick(&self, tick: &Tick) -> Result<(), IngestError>;
}
