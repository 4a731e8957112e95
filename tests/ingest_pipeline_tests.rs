use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use trading_bot::error::IngestError;
use trading_bot::ingest::{
    Enqueue, IngestPipeline, PipelineState, RawTrade, StreamSource, TickProducer, TickSink,
    TradeHandler,
};
use trading_bot::model::tick::Tick;
use trading_bot::store::SqliteStore;

/// Feed double: records lifecycle calls and lets the test push trades
/// through the same handler a real transport would use.
#[derive(Default)]
struct ScriptedSource {
    connects: AtomicUsize,
    subscribes: AtomicUsize,
    closes: AtomicUsize,
    fail_connect: bool,
    fail_subscribe: bool,
    cancel: CancellationToken,
    handler: Mutex<Option<TradeHandler>>,
    symbols: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    fn failing_subscribe() -> Self {
        Self {
            fail_subscribe: true,
            ..Self::default()
        }
    }

    fn push(&self, symbol: &str, price: f64, size: u64, ts_ms: i64) -> Enqueue {
        let handler = self.handler.lock().clone().expect("source not connected");
        handler.on_trade(RawTrade {
            symbol: symbol.to_string(),
            price,
            size,
            timestamp: Utc.timestamp_millis_opt(ts_ms).single().expect("valid ts"),
        })
    }
}

#[async_trait]
impl StreamSource for ScriptedSource {
    fn connect(&self, ticks: TickProducer) -> Result<(), IngestError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(IngestError::Connection("refused".to_string()));
        }
        *self.handler.lock() = Some(TradeHandler::new(ticks, self.cancel.clone()));
        Ok(())
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<(), IngestError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe {
            return Err(IngestError::Subscription("rejected".to_string()));
        }
        self.symbols.lock().extend(symbols.iter().cloned());
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct RecordingSink {
    ticks: Mutex<Vec<Tick>>,
    fail_on: Option<usize>,
    calls: AtomicUsize,
}

impl TickSink for RecordingSink {
    fn log_tick(&self, tick: &Tick) -> Result<(), IngestError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(call) {
            return Err(IngestError::Persistence("disk full".to_string()));
        }
        self.ticks.lock().push(tick.clone());
        Ok(())
    }
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
/// Verifies the happy path: ticks pushed by the feed reach the sink in
/// arrival order and the pipeline walks Idle -> Consuming -> Closed.
async fn ticks_reach_sink_in_order() {
    let source = Arc::new(ScriptedSource::default());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = IngestPipeline::new(source.clone(), sink.clone(), 16);
    assert_eq!(pipeline.state(), PipelineState::Idle);

    pipeline.start(&symbols(&["AAPL"])).await.expect("start");
    assert_eq!(pipeline.state(), PipelineState::Consuming);

    for i in 0..5 {
        assert_eq!(
            source.push("AAPL", 150.0 + i as f64, 10, 1_700_000_000_000 + i),
            Enqueue::Accepted
        );
    }
    pipeline.shutdown().await;

    let got = sink.ticks.lock().clone();
    let prices: Vec<f64> = got.iter().map(|t| t.price).collect();
    assert_eq!(prices, vec![150.0, 151.0, 152.0, 153.0, 154.0]);
    assert_eq!(pipeline.state(), PipelineState::Closed);
    assert_eq!(pipeline.stats().persisted, 5);
}

#[tokio::test]
/// Verifies drop-on-full: with capacity 2 and a stalled consumer, the third
/// tick is discarded and the first two are persisted.
async fn full_channel_drops_newest_tick() {
    let source = Arc::new(ScriptedSource::default());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = IngestPipeline::new(source.clone(), sink.clone(), 2);
    pipeline.start(&symbols(&["AAPL"])).await.expect("start");

    // current-thread runtime: the consumer cannot run between these pushes
    assert_eq!(source.push("AAPL", 1.0, 1, 1), Enqueue::Accepted);
    assert_eq!(source.push("AAPL", 2.0, 1, 2), Enqueue::Accepted);
    assert_eq!(source.push("AAPL", 3.0, 1, 3), Enqueue::Dropped);

    pipeline.shutdown().await;

    let prices: Vec<f64> = sink.ticks.lock().iter().map(|t| t.price).collect();
    assert_eq!(prices, vec![1.0, 2.0]);
    let stats = pipeline.stats();
    assert_eq!(stats.enqueued, 2);
    assert_eq!(stats.dropped, 1);
}

#[tokio::test]
/// Verifies a sink failure on one tick does not stop later ticks.
async fn sink_failure_skips_only_that_tick() {
    let source = Arc::new(ScriptedSource::default());
    let sink = Arc::new(RecordingSink {
        fail_on: Some(1),
        ..RecordingSink::default()
    });
    let pipeline = IngestPipeline::new(source.clone(), sink.clone(), 8);
    pipeline.start(&symbols(&["MSFT"])).await.expect("start");

    for i in 0..3 {
        source.push("MSFT", 300.0 + i as f64, 5, 1_000 + i);
    }
    pipeline.shutdown().await;

    let prices: Vec<f64> = sink.ticks.lock().iter().map(|t| t.price).collect();
    assert_eq!(prices, vec![300.0, 302.0]);
    let stats = pipeline.stats();
    assert_eq!(stats.persisted, 2);
    assert_eq!(stats.persist_failures, 1);
}

#[tokio::test]
/// Verifies close is idempotent and safe before start; a later start is
/// refused with Closed and never reaches the source.
async fn close_before_start_and_twice() {
    let source = Arc::new(ScriptedSource::default());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = IngestPipeline::new(source.clone(), sink, 4);

    pipeline.close();
    pipeline.close();
    assert_eq!(pipeline.state(), PipelineState::Closed);
    assert_eq!(source.closes.load(Ordering::SeqCst), 1);

    let err = pipeline.start(&symbols(&["AAPL"])).await.unwrap_err();
    assert_eq!(err, IngestError::Closed);
    assert_eq!(source.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
/// Verifies an empty symbol list connects and consumes without subscribing.
async fn start_with_no_symbols_skips_subscribe() {
    let source = Arc::new(ScriptedSource::default());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = IngestPipeline::new(source.clone(), sink, 4);

    pipeline.start(&[]).await.expect("start");
    assert_eq!(source.connects.load(Ordering::SeqCst), 1);
    assert_eq!(source.subscribes.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.state(), PipelineState::Consuming);
    pipeline.shutdown().await;
}

#[tokio::test]
/// Verifies a second start only extends the subscription and never
/// reconnects.
async fn second_start_only_subscribes() {
    let source = Arc::new(ScriptedSource::default());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = IngestPipeline::new(source.clone(), sink, 4);

    pipeline.start(&symbols(&["AAPL"])).await.expect("first start");
    pipeline.start(&symbols(&["TSLA"])).await.expect("second start");

    assert_eq!(source.connects.load(Ordering::SeqCst), 1);
    assert_eq!(source.subscribes.load(Ordering::SeqCst), 2);
    assert_eq!(*source.symbols.lock(), symbols(&["AAPL", "TSLA"]));
    pipeline.shutdown().await;
}

#[tokio::test]
/// Verifies connect failures surface to the caller and leave the pipeline
/// idle with no consumer running.
async fn connect_failure_is_returned() {
    let source = Arc::new(ScriptedSource::failing_connect());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = IngestPipeline::new(source.clone(), sink, 4);

    let err = pipeline.start(&symbols(&["AAPL"])).await.unwrap_err();
    assert!(matches!(err, IngestError::Connection(_)));
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(source.subscribes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
/// Verifies subscribe failures surface and the pipeline stays Connected.
async fn subscribe_failure_is_returned() {
    let source = Arc::new(ScriptedSource::failing_subscribe());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = IngestPipeline::new(source.clone(), sink, 4);

    let err = pipeline.start(&symbols(&["AAPL"])).await.unwrap_err();
    assert!(matches!(err, IngestError::Subscription(_)));
    assert_eq!(pipeline.state(), PipelineState::Connected);
    pipeline.close();
}

#[tokio::test]
/// Verifies callbacks arriving after close are inert and never reach the
/// sink.
async fn trades_after_close_are_ignored() {
    let source = Arc::new(ScriptedSource::default());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = IngestPipeline::new(source.clone(), sink.clone(), 4);
    pipeline.start(&symbols(&["AAPL"])).await.expect("start");

    pipeline.shutdown().await;
    assert_eq!(source.push("AAPL", 1.0, 1, 1), Enqueue::Closed);
    assert!(sink.ticks.lock().is_empty());
}

#[tokio::test]
/// Verifies end-to-end persistence into SQLite: two AAPL prints land in
/// tick_log with the same symbol, price, volume and timestamp.
async fn ticks_are_persisted_to_sqlite() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(SqliteStore::open_in_memory().expect("open store"));
    let pipeline = IngestPipeline::new(source.clone(), store.clone(), 16);
    pipeline.start(&symbols(&["AAPL"])).await.expect("start");

    source.push("AAPL", 150.00, 100, 1_700_000_000_000);
    source.push("AAPL", 150.05, 25, 1_700_000_000_500);
    pipeline.shutdown().await;

    assert_eq!(store.tick_count().expect("count"), 2);
    let ticks = store.recent_ticks("AAPL", 10).expect("recent ticks");
    assert_eq!(ticks.len(), 2);
    assert_eq!(ticks[0].symbol, "AAPL");
    assert!((ticks[0].price - 150.00).abs() < f64::EPSILON);
    assert_eq!(ticks[0].volume, 100);
    assert_eq!(ticks[0].timestamp_ms(), 1_700_000_000_000);
    assert!((ticks[1].price - 150.05).abs() < f64::EPSILON);
    assert_eq!(ticks[1].timestamp_ms(), 1_700_000_000_500);
}

#[tokio::test]
/// Verifies an unstorable volume is counted as a persistence failure by the
/// consumer and the following tick is still written.
async fn oversized_volume_counts_as_persist_failure() {
    let source = Arc::new(ScriptedSource::default());
    let store = Arc::new(SqliteStore::open_in_memory().expect("open store"));
    let pipeline = IngestPipeline::new(source.clone(), store.clone(), 16);
    pipeline.start(&symbols(&["AAPL"])).await.expect("start");

    source.push("AAPL", 150.00, u64::MAX, 1_000);
    source.push("AAPL", 150.05, 25, 2_000);
    pipeline.shutdown().await;

    let stats = pipeline.stats();
    assert_eq!(stats.persist_failures, 1);
    assert_eq!(stats.persisted, 1);
    let ticks = store.recent_ticks("AAPL", 10).expect("recent ticks");
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].volume, 25);
}
