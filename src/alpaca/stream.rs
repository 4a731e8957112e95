use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::messages::{decode_frame, is_auth_error, AuthRequest, StreamMessage, SubscribeRequest};
use crate::error::IngestError;
use crate::ingest::channel::TickProducer;
use crate::ingest::source::{normalize_symbols, StreamSource, SubscriptionSet, TradeHandler};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Exponential backoff for reconnection.
struct ExponentialBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
    factor: f64,
}

impl ExponentialBackoff {
    fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            current: initial,
            initial,
            max,
            factor,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.factor).min(self.max.as_secs_f64()),
        );
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Alpaca real-time stock trades over WebSocket.
///
/// `connect` spawns the connection task, which authenticates, replays the
/// subscription set and reconnects with backoff until the client is closed
/// or its parent token is cancelled.
pub struct AlpacaStreamClient {
    url: String,
    api_key: String,
    api_secret: String,
    cancel: CancellationToken,
    subscriptions: SubscriptionSet,
    commands: Mutex<Option<mpsc::UnboundedSender<Vec<String>>>>,
}

impl AlpacaStreamClient {
    pub fn new(
        data_ws_url: &str,
        feed: &str,
        api_key: &str,
        api_secret: &str,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            url: format!("{}/{}", data_ws_url.trim_end_matches('/'), feed),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            cancel: parent.child_token(),
            subscriptions: SubscriptionSet::default(),
            commands: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.subscriptions.snapshot()
    }
}

fn validate_ws_url(url: &str) -> Result<(), IngestError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| IngestError::Connection(format!("invalid feed url '{}': {}", url, e)))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(IngestError::Connection(format!(
            "unsupported feed url scheme '{}'",
            other
        ))),
    }
}

#[async_trait]
impl StreamSource for AlpacaStreamClient {
    fn connect(&self, ticks: TickProducer) -> Result<(), IngestError> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Connection("stream client is closed".to_string()));
        }
        validate_ws_url(&self.url)?;
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(IngestError::Connection(
                "missing Alpaca API credentials".to_string(),
            ));
        }

        let mut commands = self.commands.lock();
        if commands.is_some() {
            return Err(IngestError::Connection(
                "connection already dispatched".to_string(),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *commands = Some(tx);
        drop(commands);

        let session = Session {
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            api_secret: self.api_secret.clone(),
            handler: TradeHandler::new(ticks, self.cancel.clone()),
            subscriptions: self.subscriptions.clone(),
            cancel: self.cancel.clone(),
        };
        tokio::spawn(session.run(rx));
        Ok(())
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<(), IngestError> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::Subscription(
                "stream client is closed".to_string(),
            ));
        }
        let symbols = normalize_symbols(symbols)?;

        let commands = self.commands.lock();
        let Some(tx) = commands.as_ref() else {
            return Err(IngestError::Subscription("not connected".to_string()));
        };
        self.subscriptions.insert_all(&symbols);
        tx.send(symbols).map_err(|_| {
            IngestError::Subscription("stream connection task has stopped".to_string())
        })
    }

    fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        tracing::info!(url = %self.url, "Market stream close requested");
    }
}

struct Session {
    url: String,
    api_key: String,
    api_secret: String,
    handler: TradeHandler,
    subscriptions: SubscriptionSet,
    cancel: CancellationToken,
}

impl Session {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<Vec<String>>) {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60), 2.0);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.connect_once(&mut commands, &mut backoff).await {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %format!("{:#}", e),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Market stream connection error, reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = self.cancel.cancelled() => break,
                    }
                }
            }
        }
        tracing::info!(url = %self.url, "Market stream connection stopped");
    }

    /// One connection lifetime. `Ok` means a requested shutdown, `Err` a
    /// transport or protocol failure worth reconnecting after.
    async fn connect_once(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Vec<String>>,
        backoff: &mut ExponentialBackoff,
    ) -> Result<()> {
        tracing::info!(url = %self.url, "Connecting to market stream");

        let (ws_stream, _resp) = tokio::select! {
            res = tokio_tungstenite::connect_async(self.url.as_str()) => {
                res.context("WebSocket connect failed")?
            }
            _ = self.cancel.cancelled() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        let auth = serde_json::to_string(&AuthRequest::new(&self.api_key, &self.api_secret))?;
        write
            .send(Message::Text(auth))
            .await
            .context("failed to send auth message")?;
        let mut authenticated = false;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let messages = match decode_frame(&text) {
                                Ok(messages) => messages,
                                Err(e) => {
                                    tracing::warn!(error = %e, "Failed to parse stream frame");
                                    continue;
                                }
                            };
                            for message in messages {
                                match message {
                                    StreamMessage::Success { msg } if msg == "authenticated" => {
                                        authenticated = true;
                                        backoff.reset();
                                        tracing::info!("Market stream authenticated");
                                        let symbols = self.subscriptions.snapshot();
                                        if !symbols.is_empty() {
                                            send_subscribe(&mut write, &symbols).await?;
                                        }
                                    }
                                    StreamMessage::Success { msg } => {
                                        tracing::debug!(msg = %msg, "Market stream status");
                                    }
                                    StreamMessage::Error { code, msg } => {
                                        if is_auth_error(code) {
                                            bail!("alpaca rejected credentials ({}): {}", code, msg);
                                        }
                                        tracing::warn!(code, msg = %msg, "Market stream error message");
                                    }
                                    StreamMessage::Subscription { trades } => {
                                        tracing::info!(trades = ?trades, "Trade subscription confirmed");
                                    }
                                    StreamMessage::Trade(trade) => {
                                        self.handler.on_trade(trade.into());
                                    }
                                    StreamMessage::Other => {}
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            bail!("WebSocket closed by server: {:?}", frame);
                        }
                        Some(Ok(_)) => {
                            // tokio-tungstenite answers pings itself
                        }
                        Some(Err(e)) => {
                            return Err(anyhow!("WebSocket read error: {}", e));
                        }
                        None => {
                            bail!("WebSocket stream ended");
                        }
                    }
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(symbols) => {
                            // before auth the symbols go out with the snapshot
                            if authenticated {
                                send_subscribe(&mut write, &symbols).await?;
                            }
                        }
                        None => return Ok(()),
                    }
                }
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}

async fn send_subscribe(write: &mut WsWrite, symbols: &[String]) -> Result<()> {
    let payload = serde_json::to_string(&SubscribeRequest::trades(symbols))?;
    write
        .send(Message::Text(payload))
        .await
        .context("failed to send subscribe message")?;
    tracing::debug!(symbols = ?symbols, "Trade subscription sent");
    Ok(())
}
