use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::model::tick::Tick;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Outcome of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Accepted,
    /// Channel was at capacity; the offered tick was discarded.
    Dropped,
    /// Channel no longer accepts ticks.
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub capacity: usize,
    pub enqueued: u64,
    pub dropped: u64,
}

/// Create the bounded tick channel shared by a feed callback and the
/// pipeline consumer. A zero capacity is raised to one.
pub fn bounded(capacity: usize) -> (TickProducer, TickConsumer) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let closed = CancellationToken::new();
    let producer = TickProducer {
        tx,
        closed: closed.clone(),
        counters: Arc::new(Counters::default()),
        capacity,
    };
    let consumer = TickConsumer {
        rx,
        closed,
        draining: false,
    };
    (producer, consumer)
}

/// Write half. Cheap to clone; every clone feeds the same queue.
#[derive(Debug, Clone)]
pub struct TickProducer {
    tx: mpsc::Sender<Tick>,
    closed: CancellationToken,
    counters: Arc<Counters>,
    capacity: usize,
}

impl TickProducer {
    /// Offer a tick without waiting. When the queue is full the new tick is
    /// discarded, never an older one.
    pub fn try_enqueue(&self, tick: Tick) -> Enqueue {
        if self.closed.is_cancelled() {
            return Enqueue::Closed;
        }
        match self.tx.try_send(tick) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Enqueue::Accepted
            }
            Err(TrySendError::Full(tick)) => {
                let dropped_total = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    symbol = %tick.symbol,
                    price = tick.price,
                    dropped_total,
                    "Tick channel full, dropping tick"
                );
                Enqueue::Dropped
            }
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Stop accepting ticks. The consumer still drains what is buffered and
    /// then sees end-of-stream. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            capacity: self.capacity,
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Read half, owned by exactly one consumer.
#[derive(Debug)]
pub struct TickConsumer {
    rx: mpsc::Receiver<Tick>,
    closed: CancellationToken,
    draining: bool,
}

impl TickConsumer {
    /// Wait for the next tick. Returns `None` once the channel has been
    /// closed and every buffered tick has been handed out, or when all
    /// producers are gone.
    pub async fn recv(&mut self) -> Option<Tick> {
        if !self.draining {
            tokio::select! {
                biased;
                tick = self.rx.recv() => return tick,
                _ = self.closed.cancelled() => {}
            }
            self.rx.close();
            self.draining = true;
        }
        self.rx.recv().await
    }
}
