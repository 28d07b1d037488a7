//! Library entrypoint for StockAlerts.
//!
//! The binary only wires collaborators together; everything else lives here
//! so integration tests under `tests/` can drive the monitor and the routers
//! against in-memory fakes.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod models;
pub mod monitor;
pub mod services;
pub mod templates;

pub mod controllers;
pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub settings: config::Settings,
    pub store: Arc<dyn services::alert_store::AlertStore>,
    pub quotes: Arc<dyn services::quotes::QuoteSource>,
    pub monitor: monitor::AlertMonitor,
    pub events_tx: tokio::sync::broadcast::Sender<String>,
}
