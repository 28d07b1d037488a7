use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};

use super::feed::PriceTick;
use super::prices::PriceSource;
use super::{shutdown_requested, MonitorCore};
use crate::error::with_timeout;
use crate::models::Alert;

const MAX_INFLIGHT_TICKS: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub alerts: usize,
    pub symbols: usize,
    pub quotes_failed: usize,
    pub fired: usize,
    /// Stopped early because the monitor is shutting down.
    pub interrupted: bool,
    pub finished_at: DateTime<Utc>,
}

/// One full pass over armed alerts using pulled quotes. A failed or slow
/// quote skips that symbol only.
pub(crate) async fn run_sweep(core: &MonitorCore) -> SweepReport {
    let mut report = SweepReport {
        alerts: 0,
        symbols: 0,
        quotes_failed: 0,
        fired: 0,
        interrupted: false,
        finished_at: Utc::now(),
    };

    let alerts = match core.store.list_active(true).await {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(error = %e, "sweep could not load alerts");
            return report;
        }
    };

    // 1 quote request per symbol
    let mut by_symbol: BTreeMap<String, Vec<Alert>> = BTreeMap::new();
    for a in alerts {
        by_symbol.entry(a.symbol.to_uppercase()).or_default().push(a);
    }
    report.alerts = by_symbol.values().map(Vec::len).sum();
    report.symbols = by_symbol.len();

    if by_symbol.is_empty() {
        tracing::debug!("no armed alerts to sweep");
    }

    let mut shutdown = core.shutdown.subscribe();
    for (sym, group) in by_symbol {
        let fetched = tokio::select! {
            res = with_timeout(core.settings.quote_timeout, core.quotes.fetch_price(&sym)) => res,
            _ = shutdown_requested(&mut shutdown) => {
                tracing::info!(symbol = %sym, "shutdown requested; sweep abandoned");
                report.interrupted = true;
                break;
            }
        };
        let price = match fetched {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(symbol = %sym, error = %e, "quote fetch failed; symbol skipped this sweep");
                report.quotes_failed += 1;
                continue;
            }
        };

        report.fired += core
            .process_price(&sym, price, PriceSource::Poll, Utc::now(), Some(group))
            .await;
    }

    // catches changes whose notification was missed
    if let Err(e) = core.refresh_symbols().await {
        tracing::warn!(error = %e, "symbol refresh after sweep failed");
    }

    report.finished_at = Utc::now();
    tracing::info!(
        alerts = report.alerts,
        symbols = report.symbols,
        quotes_failed = report.quotes_failed,
        fired = report.fired,
        interrupted = report.interrupted,
        "price alert sweep finished"
    );

    *core.last_sweep.lock().unwrap_or_else(|p| p.into_inner()) = Some(report.clone());
    report
}

pub(crate) fn spawn_sweeper(core: Arc<MonitorCore>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(core.settings.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    run_sweep(&core).await;
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        tracing::info!("sweep timer stopped");
    })
}

/// Each tick is evaluated on its own task so a slow notification never holds
/// up later ticks. At most `MAX_INFLIGHT_TICKS` run at once; past that the
/// router waits, which backs pressure up into the tick channel.
pub(crate) fn spawn_tick_router(
    core: Arc<MonitorCore>,
    mut ticks: mpsc::Receiver<PriceTick>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut inflight = JoinSet::new();

        loop {
            tokio::select! {
                tick = ticks.recv() => {
                    let Some(tick) = tick else { break };
                    while inflight.len() >= MAX_INFLIGHT_TICKS {
                        if let Some(res) = inflight.join_next().await {
                            log_tick_task(res);
                        }
                    }
                    let core = core.clone();
                    inflight.spawn(async move {
                        core.process_price(&tick.symbol, tick.price, PriceSource::Push, tick.observed_at, None)
                            .await;
                    });
                }
                Some(res) = inflight.join_next(), if !inflight.is_empty() => log_tick_task(res),
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        // evaluations already started are allowed to finish
        while let Some(res) = inflight.join_next().await {
            log_tick_task(res);
        }
    })
}

fn log_tick_task(res: std::result::Result<(), JoinError>) {
    if let Err(e) = res {
        tracing::warn!(error = %e, "tick evaluation task failed");
    }
}
