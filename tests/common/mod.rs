#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use stockalerts::{
    config::{self, MonitorSettings},
    error::{AlertError, Result},
    models::{Alert, AlertCondition},
    monitor::{
        feed::{FeedConnection, FeedTransport},
        AlertMonitor, MonitorDeps,
    },
    services::{
        alert_store::AlertStore, memory_store::MemoryAlertStore, notifier::Notifier,
        quotes::QuoteSource,
    },
    AppState,
};

// ---------------- Quotes ----------------

#[derive(Default)]
pub struct FakeQuotes {
    prices: Mutex<HashMap<String, Decimal>>,
    slow: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FakeQuotes {
    pub fn set(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    /// Makes `symbol` hang far longer than any test quote timeout.
    pub fn hang(&self, symbol: &str) {
        self.slow.lock().unwrap().insert(symbol.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteSource for FakeQuotes {
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hang = self.slow.lock().unwrap().contains(symbol);
        if hang {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let price = self.prices.lock().unwrap().get(symbol).copied();
        price.ok_or_else(|| AlertError::QuoteUnavailable {
            symbol: symbol.to_string(),
            reason: "no scripted price".to_string(),
        })
    }
}

// ---------------- Notifier ----------------

#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<ObjectId>>,
    fail: AtomicBool,
    holds: Mutex<HashMap<String, Duration>>,
}

impl RecordingNotifier {
    pub fn fail(&self, yes: bool) {
        self.fail.store(yes, Ordering::SeqCst);
    }

    /// Delivery for alerts on `symbol` takes `delay` after the call is recorded.
    pub fn hold(&self, symbol: &str, delay: Duration) {
        self.holds.lock().unwrap().insert(symbol.to_string(), delay);
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn count_for(&self, id: ObjectId) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == id).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        self.calls.lock().unwrap().push(alert.id);
        let hold = self.holds.lock().unwrap().get(&alert.symbol).copied();
        if let Some(delay) = hold {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AlertError::Notification("mail relay unavailable".to_string()));
        }
        Ok(())
    }
}

// ---------------- Feed transport ----------------

/// Server side of one fake streaming connection.
pub struct FakeServer {
    sent: mpsc::UnboundedReceiver<String>,
    push: Option<mpsc::UnboundedSender<Result<String>>>,
    client_closed: Arc<AtomicBool>,
}

impl FakeServer {
    pub fn push_text(&self, text: &str) {
        if let Some(tx) = &self.push {
            let _ = tx.send(Ok(text.to_string()));
        }
    }

    pub fn push_price(&self, symbol: &str, price: &str) {
        self.push_text(&format!(r#"{{"event":"price","symbol":"{symbol}","price":{price}}}"#));
    }

    /// Abnormal termination as seen by the client.
    pub fn fail(&self) {
        if let Some(tx) = &self.push {
            let _ = tx.send(Err(AlertError::Feed("connection reset".to_string())));
        }
    }

    /// Clean close as seen by the client.
    pub fn close(&mut self) {
        self.push = None;
    }

    pub fn client_closed(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }

    pub async fn next_sent(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(2), self.sent.recv())
            .await
            .expect("client message in time")
            .expect("client connection open");
        serde_json::from_str(&text).expect("client sent json")
    }

    pub fn try_next_sent(&mut self) -> Option<Value> {
        self.sent
            .try_recv()
            .ok()
            .map(|t| serde_json::from_str(&t).expect("client sent json"))
    }
}

struct FakeConnection {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<Result<String>>,
    closed: Arc<AtomicBool>,
    fail_close: bool,
}

#[async_trait]
impl FeedConnection for FakeConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.outgoing
            .send(text)
            .map_err(|_| AlertError::Feed("server gone".to_string()))
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        self.incoming.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(AlertError::Feed("close handshake failed".to_string()));
        }
        Ok(())
    }
}

pub struct FakeTransport {
    connects: AtomicUsize,
    refuse: AtomicUsize,
    fail_close: AtomicBool,
    sessions_tx: mpsc::UnboundedSender<FakeServer>,
    sessions_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeServer>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        Self {
            connects: AtomicUsize::new(0),
            refuse: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
            sessions_tx,
            sessions_rx: tokio::sync::Mutex::new(sessions_rx),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Connections opened from now on report an error when closed.
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Waits for the client to open its next connection.
    pub async fn accept(&self) -> FakeServer {
        let mut rx = self.sessions_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("client connected in time")
            .expect("transport alive")
    }
}

#[async_trait]
impl FeedTransport for FakeTransport {
    async fn connect(&self) -> Result<Box<dyn FeedConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(AlertError::Feed("connection refused".to_string()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let _ = self.sessions_tx.send(FakeServer {
            sent: out_rx,
            push: Some(in_tx),
            client_closed: closed.clone(),
        });

        Ok(Box::new(FakeConnection {
            outgoing: out_tx,
            incoming: in_rx,
            closed,
            fail_close: self.fail_close.load(Ordering::SeqCst),
        }))
    }
}

// ---------------- Harness ----------------

pub fn fast_settings() -> MonitorSettings {
    MonitorSettings {
        feed_url: "ws://feed.invalid".to_string(),
        feed_api_key: "test-key".to_string(),
        sweep_interval: Duration::from_secs(3600),
        reconnect_after_close: Duration::from_millis(20),
        reconnect_after_error: Duration::from_millis(40),
        connect_timeout: Duration::from_secs(1),
        quote_timeout: Duration::from_millis(200),
        notify_timeout: Duration::from_millis(200),
    }
}

pub struct Harness {
    pub store: Arc<MemoryAlertStore>,
    pub quotes: Arc<FakeQuotes>,
    pub notifier: Arc<RecordingNotifier>,
    pub transport: Arc<FakeTransport>,
    pub monitor: AlertMonitor,
    pub events_tx: broadcast::Sender<String>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: MonitorSettings) -> Self {
        let store = Arc::new(MemoryAlertStore::new());
        let quotes = Arc::new(FakeQuotes::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let transport = Arc::new(FakeTransport::new());
        let (events_tx, _events_rx) = broadcast::channel::<String>(16);

        let monitor = AlertMonitor::new(
            settings,
            MonitorDeps {
                store: store.clone(),
                quotes: quotes.clone(),
                notifier: notifier.clone(),
                transport: transport.clone(),
                events_tx: events_tx.clone(),
            },
        );

        Self {
            store,
            quotes,
            notifier,
            transport,
            monitor,
            events_tx,
        }
    }

    /// Writes straight to the store; callers decide when to notify the monitor.
    pub async fn add_alert(&self, symbol: &str, condition: AlertCondition, target: Decimal) -> Alert {
        let alert = Alert::new(ObjectId::new(), symbol, condition, target, chrono::Utc::now().timestamp());
        self.store.insert(&alert).await.unwrap();
        alert
    }

    pub async fn alert(&self, id: ObjectId) -> Alert {
        self.store.get(id).await.unwrap().expect("alert exists")
    }

    pub fn app_state(&self) -> AppState {
        let mut settings = config::load();
        settings.monitor = fast_settings();

        AppState {
            settings,
            store: self.store.clone(),
            quotes: self.quotes.clone(),
            monitor: self.monitor.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    wait_until_within(what, Duration::from_secs(2), check).await
}

pub async fn wait_until_within(what: &str, limit: Duration, check: impl Fn() -> bool) {
    let deadline = Instant::now() + limit;
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
