//! Alert monitoring engine.
//!
//! Two producers feed the [`evaluator::Evaluator`]: ticks from the push feed
//! and a periodic poll sweep. The store's conditional update is the only
//! mutual-exclusion point between them.

pub mod evaluator;
pub mod feed;
pub mod prices;
pub mod registry;
pub mod scheduler;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::MonitorSettings;
use crate::error::{AlertError, Result};
use crate::models::Alert;
use crate::services::alert_store::AlertStore;
use crate::services::notifier::Notifier;
use crate::services::quotes::QuoteSource;

use evaluator::Evaluator;
use feed::{FeedConfig, FeedHandle, FeedState, FeedTransport, FeedWiring, PushFeed};
use prices::{PriceCache, PriceObservation, PriceSource};
use registry::{SymbolDiff, SymbolRegistry};
use scheduler::SweepReport;

const TICK_BUFFER: usize = 1024;

pub const ALERTS_UPDATED: &str = "alertsUpdated";

/// Collaborators the monitor runs against.
pub struct MonitorDeps {
    pub store: Arc<dyn AlertStore>,
    pub quotes: Arc<dyn QuoteSource>,
    pub notifier: Arc<dyn Notifier>,
    pub transport: Arc<dyn FeedTransport>,
    pub events_tx: broadcast::Sender<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub feed_state: FeedState,
    pub watched_symbols: Vec<String>,
    pub prices: BTreeMap<String, PriceObservation>,
    pub last_sweep: Option<SweepReport>,
}

/// Owned engine instance with an explicit `start`/`stop` lifecycle.
#[derive(Clone)]
pub struct AlertMonitor {
    core: Arc<MonitorCore>,
}

pub(crate) struct MonitorCore {
    pub(crate) settings: MonitorSettings,
    pub(crate) store: Arc<dyn AlertStore>,
    pub(crate) quotes: Arc<dyn QuoteSource>,
    transport: Arc<dyn FeedTransport>,
    evaluator: Evaluator,
    registry: tokio::sync::Mutex<SymbolRegistry>,
    prices: PriceCache,
    feed: FeedHandle,
    feed_wiring: Mutex<Option<FeedWiring>>,
    events_tx: broadcast::Sender<String>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) last_sweep: Mutex<Option<SweepReport>>,
}

/// Resolves once `stop` has been requested (or the monitor is gone).
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl AlertMonitor {
    pub fn new(settings: MonitorSettings, deps: MonitorDeps) -> Self {
        let (feed, wiring) = feed::feed_channel();
        let (shutdown, _) = watch::channel(false);
        let evaluator = Evaluator::new(deps.store.clone(), deps.notifier, settings.notify_timeout);

        Self {
            core: Arc::new(MonitorCore {
                settings,
                store: deps.store,
                quotes: deps.quotes,
                transport: deps.transport,
                evaluator,
                registry: tokio::sync::Mutex::new(SymbolRegistry::new()),
                prices: PriceCache::default(),
                feed,
                feed_wiring: Mutex::new(Some(wiring)),
                events_tx: deps.events_tx,
                shutdown,
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
                last_sweep: Mutex::new(None),
            }),
        }
    }

    /// Computes the watched set, then spawns the push feed, the tick router
    /// and the sweep timer. The first sweep runs immediately.
    pub async fn start(&self) -> Result<()> {
        let core = &self.core;
        if core.started.swap(true, Ordering::SeqCst) {
            return Err(AlertError::AlreadyStarted);
        }
        let wiring = core
            .feed_wiring
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or(AlertError::AlreadyStarted)?;

        tracing::info!("starting price alert monitor");

        if let Err(e) = core.refresh_symbols().await {
            tracing::warn!(error = %e, "initial symbol refresh failed; first sweep will retry");
        }

        let (tick_tx, tick_rx) = mpsc::channel(TICK_BUFFER);
        let feed = PushFeed::new(
            core.transport.clone(),
            FeedConfig::from(&core.settings),
            wiring,
            tick_tx,
            core.shutdown.subscribe(),
        );

        let handles = vec![
            tokio::spawn(feed.run()),
            scheduler::spawn_tick_router(core.clone(), tick_rx, core.shutdown.subscribe()),
            scheduler::spawn_sweeper(core.clone(), core.shutdown.subscribe()),
        ];
        core.tasks.lock().unwrap_or_else(|p| p.into_inner()).extend(handles);

        Ok(())
    }

    /// Closes the push connection and cancels the sweep timer. Evaluations
    /// already running are allowed to finish. Safe to call more than once.
    pub async fn stop(&self) {
        self.core.shutdown.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self
            .core
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();

        if handles.is_empty() {
            return;
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "monitor task ended abnormally");
            }
        }
        tracing::info!("price alert monitor stopped");
    }

    /// Hook for the CRUD layer: call after any alert create/update/delete.
    /// Failures are logged; the next sweep reconciles anyway.
    pub async fn on_alerts_changed(&self) {
        if let Err(e) = self.core.refresh_symbols().await {
            tracing::warn!(error = %e, "symbol refresh after alert change failed");
        }
    }

    /// Runs one full poll sweep now, outside the timer.
    pub async fn sweep_now(&self) -> SweepReport {
        scheduler::run_sweep(&self.core).await
    }

    /// Routes one observed price through the evaluator, as a feed tick or a
    /// poll result would be. Returns the number of alerts that fired.
    pub async fn ingest(&self, symbol: &str, price: Decimal, source: PriceSource) -> usize {
        let symbol = symbol.trim().to_uppercase();
        self.core
            .process_price(&symbol, price, source, Utc::now(), None)
            .await
    }

    pub async fn watched_symbols(&self) -> BTreeSet<String> {
        self.core.registry.lock().await.symbols().clone()
    }

    pub fn feed_state(&self) -> FeedState {
        self.core.feed.state()
    }

    pub fn feed_state_changes(&self) -> watch::Receiver<FeedState> {
        self.core.feed.state_changes()
    }

    pub fn last_price(&self, symbol: &str) -> Option<PriceObservation> {
        self.core.prices.get(&symbol.to_uppercase())
    }

    pub async fn status(&self) -> MonitorStatus {
        let watched_symbols = self.watched_symbols().await.into_iter().collect();

        let core = &self.core;
        let stopped = *core.shutdown.borrow();
        let last_sweep = core.last_sweep.lock().unwrap_or_else(|p| p.into_inner()).clone();

        MonitorStatus {
            running: core.started.load(Ordering::SeqCst) && !stopped,
            feed_state: core.feed.state(),
            watched_symbols,
            prices: core.prices.snapshot(),
            last_sweep,
        }
    }
}

impl MonitorCore {
    /// Recomputes the registry and hands any change to the feed worker.
    /// The registry lock keeps concurrent refreshes in order.
    pub(crate) async fn refresh_symbols(&self) -> Result<SymbolDiff> {
        let mut registry = self.registry.lock().await;
        let diff = registry.recompute(self.store.as_ref()).await?;

        if !diff.is_empty() {
            tracing::info!(
                added = ?diff.added,
                removed = ?diff.removed,
                watched = registry.symbols().len(),
                "watched symbols changed"
            );
            self.feed.watch(registry.symbols().clone());
        }

        Ok(diff)
    }

    /// Evaluates every armed alert for `symbol` at `price`. `alerts` lets the
    /// sweep reuse the rows it already loaded.
    pub(crate) async fn process_price(
        &self,
        symbol: &str,
        price: Decimal,
        source: PriceSource,
        observed_at: DateTime<Utc>,
        alerts: Option<Vec<Alert>>,
    ) -> usize {
        self.prices.record(symbol, price, source, observed_at);

        if source == PriceSource::Poll {
            if let Err(e) = self.store.record_price(symbol, price).await {
                tracing::warn!(symbol = %symbol, error = %e, "could not record last known price");
            }
        }

        let alerts = match alerts {
            Some(a) => a,
            None => match self.store.list_active_by_symbol(symbol).await {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "could not load alerts for tick");
                    return 0;
                }
            },
        };

        if alerts.is_empty() {
            tracing::debug!(symbol = %symbol, "no armed alerts for price");
            return 0;
        }

        tracing::debug!(
            symbol = %symbol,
            price = %price,
            source = ?source,
            alerts = alerts.len(),
            "checking alerts"
        );

        let results = join_all(alerts.iter().map(|a| self.evaluator.evaluate(a, price))).await;

        let mut fired = 0;
        for (alert, res) in alerts.iter().zip(results) {
            match res {
                Ok(outcome) if outcome.fired() => fired += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(alert_id = %alert.id, error = %e, "alert evaluation failed"),
            }
        }

        if fired > 0 {
            if let Err(e) = self.refresh_symbols().await {
                tracing::warn!(error = %e, "symbol refresh after fire failed");
            }
            let _ = self.events_tx.send(ALERTS_UPDATED.to_string());
        }

        fired
    }
}
