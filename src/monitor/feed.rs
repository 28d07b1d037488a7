//! Push-based price feed.
//!
//! One worker task owns the streaming connection and walks the
//! `Disconnected -> Connecting -> Connected -> Disconnected` cycle. Because a
//! single task does all connecting, reconnect attempts can never overlap.
//! The transport is a trait so the state machine can be driven without a
//! live socket.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as TMessage, MaybeTlsStream, WebSocketStream,
};

use super::shutdown_requested;
use crate::config::MonitorSettings;
use crate::error::{with_timeout, AlertError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick {
    pub symbol: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>>;
}

#[async_trait]
pub trait FeedConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Next text frame; `None` once the server closed the connection cleanly.
    async fn next_text(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}

// ---------------- Wire format ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedAction {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage<'a> {
    pub action: FeedAction,
    pub symbols: Vec<&'a str>,
    pub api_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum ServerMessage {
    Price {
        symbol: String,
        price: Decimal,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(other)]
    Other,
}

/// `Ok(None)` for well-formed messages that carry no price (heartbeats, acks).
/// A price of zero or below is an error, never a tick.
pub fn parse_server_message(text: &str) -> Result<Option<PriceTick>> {
    match serde_json::from_str::<ServerMessage>(text)? {
        ServerMessage::Price {
            symbol,
            price,
            timestamp,
        } => {
            if price <= Decimal::ZERO {
                return Err(AlertError::Feed(format!("non-positive price {price} for {symbol}")));
            }
            let observed_at = timestamp
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .unwrap_or_else(Utc::now);
            Ok(Some(PriceTick {
                symbol: symbol.trim().to_uppercase(),
                price,
                observed_at,
            }))
        }
        ServerMessage::Other => Ok(None),
    }
}

fn client_message(action: FeedAction, symbols: &[&str], api_key: &str) -> Result<String> {
    let msg = ClientMessage {
        action,
        symbols: symbols.to_vec(),
        api_key,
    };
    Ok(serde_json::to_string(&msg)?)
}

// ---------------- tokio-tungstenite transport ----------------

pub struct TwelveDataTransport {
    url: String,
}

impl TwelveDataTransport {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl FeedTransport for TwelveDataTransport {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        Ok(Box::new(WsConnection { ws }))
    }
}

struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.ws.send(TMessage::Text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.ws.next().await {
                Some(Ok(TMessage::Text(txt))) => return Some(Ok(txt)),
                Some(Ok(TMessage::Binary(bin))) => match String::from_utf8(bin) {
                    Ok(txt) => return Some(Ok(txt)),
                    Err(e) => tracing::debug!(error = %e, "non-utf8 binary frame ignored"),
                },
                Some(Ok(TMessage::Ping(payload))) => {
                    if let Err(e) = self.ws.send(TMessage::Pong(payload)).await {
                        return Some(Err(e.into()));
                    }
                }
                Some(Ok(TMessage::Close(frame))) => {
                    tracing::debug!(?frame, "feed server closed the connection");
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(Err(e.into())),
                None => return None,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}

// ---------------- Worker ----------------

#[derive(Debug)]
pub(crate) enum FeedCommand {
    Watch(BTreeSet<String>),
}

/// Cheap handle used by the rest of the monitor to steer the feed worker.
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::UnboundedSender<FeedCommand>,
    state: watch::Receiver<FeedState>,
}

impl FeedHandle {
    /// Replaces the desired subscription set. Redundant calls are harmless.
    pub(crate) fn watch(&self, symbols: BTreeSet<String>) {
        if self.commands.send(FeedCommand::Watch(symbols)).is_err() {
            tracing::debug!("feed worker gone; watch request dropped");
        }
    }

    pub fn state(&self) -> FeedState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }
}

/// Receiving ends held until the worker is spawned.
pub(crate) struct FeedWiring {
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    state: watch::Sender<FeedState>,
}

pub(crate) fn feed_channel() -> (FeedHandle, FeedWiring) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(FeedState::Disconnected);
    (
        FeedHandle {
            commands: cmd_tx,
            state: state_rx,
        },
        FeedWiring {
            commands: cmd_rx,
            state: state_tx,
        },
    )
}

#[derive(Debug, Clone)]
pub(crate) struct FeedConfig {
    pub api_key: String,
    pub reconnect_after_close: Duration,
    pub reconnect_after_error: Duration,
    pub connect_timeout: Duration,
}

impl From<&MonitorSettings> for FeedConfig {
    fn from(s: &MonitorSettings) -> Self {
        Self {
            api_key: s.feed_api_key.clone(),
            reconnect_after_close: s.reconnect_after_close,
            reconnect_after_error: s.reconnect_after_error,
            connect_timeout: s.connect_timeout,
        }
    }
}

enum SessionEnd {
    Shutdown,
    Idle,
    Closed,
    Failed(AlertError),
}

pub(crate) struct PushFeed {
    transport: Arc<dyn FeedTransport>,
    config: FeedConfig,
    desired: BTreeSet<String>,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    state: watch::Sender<FeedState>,
    ticks: mpsc::Sender<PriceTick>,
    shutdown: watch::Receiver<bool>,
}

impl PushFeed {
    pub(crate) fn new(
        transport: Arc<dyn FeedTransport>,
        config: FeedConfig,
        wiring: FeedWiring,
        ticks: mpsc::Sender<PriceTick>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            config,
            desired: BTreeSet::new(),
            commands: wiring.commands,
            state: wiring.state,
            ticks,
            shutdown,
        }
    }

    fn set_state(&self, next: FeedState) {
        self.state.send_if_modified(|cur| {
            if *cur == next {
                return false;
            }
            tracing::debug!(from = ?*cur, to = ?next, "feed state");
            *cur = next;
            true
        });
    }

    /// Only the newest desired set matters, so queued commands are coalesced.
    fn apply(&mut self, cmd: FeedCommand) {
        let FeedCommand::Watch(mut symbols) = cmd;
        while let Ok(FeedCommand::Watch(next)) = self.commands.try_recv() {
            symbols = next;
        }
        self.desired = symbols;
    }

    pub(crate) async fn run(mut self) {
        loop {
            if self.desired.is_empty() {
                tracing::info!("no symbols to watch; push feed idle");
                if !self.wait_for_symbols().await {
                    break;
                }
                continue;
            }

            self.set_state(FeedState::Connecting);
            tracing::info!(symbols = self.desired.len(), "connecting to price feed");

            let connected = tokio::select! {
                res = with_timeout(self.config.connect_timeout, self.transport.connect()) => res,
                _ = shutdown_requested(&mut self.shutdown) => break,
            };

            let end = match connected {
                Ok(mut conn) => self.run_session(conn.as_mut()).await,
                Err(e) => SessionEnd::Failed(e),
            };
            self.set_state(FeedState::Disconnected);

            let delay = match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Idle => continue,
                SessionEnd::Closed => {
                    tracing::info!(
                        retry_in_secs = self.config.reconnect_after_close.as_secs(),
                        "price feed closed"
                    );
                    self.config.reconnect_after_close
                }
                SessionEnd::Failed(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_secs = self.config.reconnect_after_error.as_secs(),
                        "price feed error"
                    );
                    self.config.reconnect_after_error
                }
            };

            if !self.backoff(delay).await {
                break;
            }
        }

        self.set_state(FeedState::Disconnected);
        tracing::info!("price feed stopped");
    }

    async fn wait_for_symbols(&mut self) -> bool {
        while self.desired.is_empty() {
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => return false,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.apply(cmd),
                    None => return false,
                },
            }
        }
        true
    }

    /// Sleeps before a reconnect while still tracking the desired set.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                _ = shutdown_requested(&mut self.shutdown) => return false,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.apply(cmd),
                    None => return false,
                },
            }
        }
    }

    async fn run_session(&mut self, conn: &mut dyn FeedConnection) -> SessionEnd {
        self.set_state(FeedState::Connected);
        tracing::info!("price feed connected");

        let mut subscribed = BTreeSet::new();
        if let Err(e) = sync_subscriptions(conn, &self.desired, &mut subscribed, &self.config.api_key).await {
            return SessionEnd::Failed(e);
        }

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => {
                    close_quietly(conn).await;
                    return SessionEnd::Shutdown;
                }
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        close_quietly(conn).await;
                        return SessionEnd::Shutdown;
                    };
                    self.apply(cmd);
                    if let Err(e) = sync_subscriptions(conn, &self.desired, &mut subscribed, &self.config.api_key).await {
                        return SessionEnd::Failed(e);
                    }
                    if self.desired.is_empty() {
                        close_quietly(conn).await;
                        return SessionEnd::Idle;
                    }
                }
                msg = conn.next_text() => match msg {
                    None => return SessionEnd::Closed,
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    Some(Ok(text)) => forward(&self.ticks, &text, &subscribed).await,
                },
            }
        }
    }
}

async fn close_quietly(conn: &mut dyn FeedConnection) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "feed close failed");
    }
}

async fn forward(ticks: &mpsc::Sender<PriceTick>, text: &str, subscribed: &BTreeSet<String>) {
    match parse_server_message(text) {
        Ok(Some(tick)) => {
            if !subscribed.contains(&tick.symbol) {
                tracing::debug!(symbol = %tick.symbol, "tick for unwatched symbol dropped");
                return;
            }
            if ticks.send(tick).await.is_err() {
                tracing::debug!("tick router gone; tick dropped");
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "malformed feed message dropped"),
    }
}

/// Sends one batched unsubscribe and one batched subscribe to move the
/// connection from `subscribed` to `desired`.
async fn sync_subscriptions(
    conn: &mut dyn FeedConnection,
    desired: &BTreeSet<String>,
    subscribed: &mut BTreeSet<String>,
    api_key: &str,
) -> Result<()> {
    let removed: Vec<&str> = subscribed.difference(desired).map(String::as_str).collect();
    if !removed.is_empty() {
        conn.send_text(client_message(FeedAction::Unsubscribe, &removed, api_key)?)
            .await?;
        tracing::info!(symbols = ?removed, "unsubscribed from price updates");
    }

    let added: Vec<&str> = desired.difference(subscribed).map(String::as_str).collect();
    if !added.is_empty() {
        conn.send_text(client_message(FeedAction::Subscribe, &added, api_key)?)
            .await?;
        tracing::info!(symbols = ?added, "subscribed to price updates");
    }

    subscribed.clone_from(desired);
    Ok(())
}
