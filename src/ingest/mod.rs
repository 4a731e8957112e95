pub mod channel;
pub mod pipeline;
pub mod simulated;
pub mod sink;
pub mod source;

pub use channel::{
    bounded, ChannelStats, Enqueue, TickConsumer, TickProducer, DEFAULT_CHANNEL_CAPACITY,
};
pub use pipeline::{IngestPipeline, PipelineState, PipelineStats};
pub use simulated::SimulatedSource;
pub use sink::TickSink;
pub use source::{normalize_symbols, RawTrade, StreamSource, SubscriptionSet, TradeHandler};
