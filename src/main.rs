use std::net::SocketAddr;
use std::sync::Arc;

use mongodb::Client;
use tracing_subscriber::EnvFilter;

use stockalerts::{
    config::{self, StoreBackend},
    error::{AlertError, Result},
    monitor::{feed::TwelveDataTransport, AlertMonitor, MonitorDeps},
    routes,
    services::{
        alert_store::{AlertStore, MongoAlertStore},
        db_init,
        memory_store::MemoryAlertStore,
        notifier::{LogNotifier, Notifier, SendGridNotifier},
        quotes::{EodhdClient, QuoteSource},
    },
    templates, AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = config::load();
    let hbs = templates::build_handlebars()?;

    let (store, notifier): (Arc<dyn AlertStore>, Arc<dyn Notifier>) = match settings.store_backend {
        StoreBackend::Mongo => {
            let client = Client::with_uri_str(&settings.mongodb_uri).await?;
            let db = client.database(&settings.mongodb_db);
            db_init::ensure_indexes(&db).await?;

            let notifier: Arc<dyn Notifier> = if settings.sendgrid_enabled() {
                Arc::new(SendGridNotifier::new(
                    &db,
                    hbs.clone(),
                    settings.sendgrid_api_key.clone(),
                    settings.from_email.clone(),
                    settings.from_name.clone(),
                    settings.frontend_url.clone(),
                ))
            } else {
                tracing::warn!("SENDGRID_API_KEY not set; alert emails will only be logged");
                Arc::new(LogNotifier::new(hbs.clone(), settings.frontend_url.clone()))
            };

            let store: Arc<dyn AlertStore> = Arc::new(MongoAlertStore::new(db));
            (store, notifier)
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory alert store; alerts are lost on restart");
            let store: Arc<dyn AlertStore> = Arc::new(MemoryAlertStore::new());
            let notifier: Arc<dyn Notifier> =
                Arc::new(LogNotifier::new(hbs.clone(), settings.frontend_url.clone()));
            (store, notifier)
        }
    };

    let quotes: Arc<dyn QuoteSource> = Arc::new(EodhdClient::new(
        settings.eodhd_base_url.clone(),
        settings.eodhd_api_key.clone(),
        settings.eodhd_exchange.clone(),
    ));
    let (events_tx, _events_rx) = tokio::sync::broadcast::channel::<String>(64);

    let monitor = AlertMonitor::new(
        settings.monitor.clone(),
        MonitorDeps {
            store: store.clone(),
            quotes: quotes.clone(),
            notifier,
            transport: Arc::new(TwelveDataTransport::new(settings.monitor.feed_url.clone())),
            events_tx: events_tx.clone(),
        },
    );
    monitor.start().await?;

    let state = AppState {
        settings: settings.clone(),
        store,
        quotes,
        monitor: monitor.clone(),
        events_tx,
    };

    let ip = settings
        .host
        .parse::<std::net::IpAddr>()
        .map_err(|e| AlertError::Validation(format!("invalid HOST {}: {e}", settings.host)))?;
    let addr = SocketAddr::from((ip, settings.port));
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, routes::app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    monitor.stop().await;
    Ok(())
}
