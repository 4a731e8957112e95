use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use super::channel::{self, TickConsumer, TickProducer};
use super::sink::TickSink;
use super::source::StreamSource;
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Connected,
    Subscribed,
    Consuming,
    Closed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineState::Idle => "idle",
            PipelineState::Connected => "connected",
            PipelineState::Subscribed => "subscribed",
            PipelineState::Consuming => "consuming",
            PipelineState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub state: PipelineState,
    pub capacity: usize,
    pub enqueued: u64,
    pub dropped: u64,
    pub persisted: u64,
    pub persist_failures: u64,
}

#[derive(Debug, Default)]
struct ConsumerCounters {
    persisted: AtomicU64,
    persist_failures: AtomicU64,
}

/// Feed → bounded channel → sink.
///
/// The channel is created here and lives as long as the pipeline. `start`
/// runs the lifecycle once; a later `start` while consuming only adds
/// symbols to the subscription.
pub struct IngestPipeline {
    source: Arc<dyn StreamSource>,
    sink: Arc<dyn TickSink>,
    producer: TickProducer,
    consumer: Mutex<Option<TickConsumer>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<PipelineState>,
    counters: Arc<ConsumerCounters>,
    start_gate: tokio::sync::Mutex<()>,
}

impl IngestPipeline {
    pub fn new(source: Arc<dyn StreamSource>, sink: Arc<dyn TickSink>, capacity: usize) -> Self {
        let (producer, consumer) = channel::bounded(capacity);
        Self {
            source,
            sink,
            producer,
            consumer: Mutex::new(Some(consumer)),
            worker: Mutex::new(None),
            state: Mutex::new(PipelineState::Idle),
            counters: Arc::new(ConsumerCounters::default()),
            start_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Connect, subscribe to `symbols` (skipped when empty) and start the
    /// consumer. Connect and subscribe failures are returned and leave the
    /// pipeline in the state it reached.
    pub async fn start(&self, symbols: &[String]) -> Result<(), IngestError> {
        let _gate = self.start_gate.lock().await;

        if self.state() == PipelineState::Closed {
            return Err(IngestError::Closed);
        }

        if self.state() == PipelineState::Idle {
            self.source.connect(self.producer.clone())?;
            self.advance(PipelineState::Connected)?;
            tracing::info!("Market stream connection dispatched");
        }

        if !symbols.is_empty() {
            self.source.subscribe(symbols).await?;
            self.advance(PipelineState::Subscribed)?;
            tracing::info!(symbols = ?symbols, "Subscribed to trades");
        }

        self.spawn_consumer()?;
        Ok(())
    }

    /// Cancel the feed connection and close the channel. The consumer drains
    /// what is already buffered and exits. Safe to call at any time, any
    /// number of times.
    pub fn close(&self) {
        let previous = {
            let mut state = self.state.lock();
            if *state == PipelineState::Closed {
                return;
            }
            std::mem::replace(&mut *state, PipelineState::Closed)
        };
        self.source.close();
        self.producer.close();
        tracing::info!(previous = %previous, "Ingest pipeline closed");
    }

    /// `close` and wait for the consumer task to finish draining.
    pub async fn shutdown(&self) {
        self.close();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Tick consumer task failed");
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        let channel = self.producer.stats();
        PipelineStats {
            state: self.state(),
            capacity: channel.capacity,
            enqueued: channel.enqueued,
            dropped: channel.dropped,
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            persist_failures: self.counters.persist_failures.load(Ordering::Relaxed),
        }
    }

    fn advance(&self, to: PipelineState) -> Result<(), IngestError> {
        let mut state = self.state.lock();
        if *state == PipelineState::Closed {
            return Err(IngestError::Closed);
        }
        if to > *state {
            *state = to;
        }
        Ok(())
    }

    fn spawn_consumer(&self) -> Result<(), IngestError> {
        let Some(consumer) = self.consumer.lock().take() else {
            // already running
            return Ok(());
        };
        self.advance(PipelineState::Consuming)?;
        let handle = tokio::spawn(consume(
            consumer,
            self.sink.clone(),
            self.counters.clone(),
        ));
        *self.worker.lock() = Some(handle);
        Ok(())
    }
}

impl Drop for IngestPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

async fn consume(
    mut ticks: TickConsumer,
    sink: Arc<dyn TickSink>,
    counters: Arc<ConsumerCounters>,
) {
    tracing::info!("Tick consumer started");
    while let Some(tick) = ticks.recv().await {
        tracing::debug!(symbol = %tick.symbol, price = tick.price, "Received tick");
        match sink.log_tick(&tick) {
            Ok(()) => {
                counters.persisted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.persist_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    symbol = %tick.symbol,
                    timestamp_ms = tick.timestamp_ms(),
                    "Failed to log tick"
                );
            }
        }
    }
    tracing::info!(
        persisted = counters.persisted.load(Ordering::Relaxed),
        failures = counters.persist_failures.load(Ordering::Relaxed),
        "Tick consumer stopped"
    );
}
