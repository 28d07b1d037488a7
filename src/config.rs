use std::{env, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mongodb_uri: String,
    pub mongodb_db: String,
    pub host: String,
    pub port: u16,
    pub store_backend: StoreBackend,

    pub eodhd_api_key: String,
    pub eodhd_base_url: String,
    pub eodhd_exchange: String,

    pub sendgrid_api_key: String,
    pub from_email: String,
    pub from_name: String,
    pub frontend_url: String,

    pub monitor: MonitorSettings,
}

/// Timings and credentials for the alert monitor. All durations are tunable;
/// only the sweep interval bounds how long an alert can go unchecked.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub feed_url: String,
    pub feed_api_key: String,
    pub sweep_interval: Duration,
    pub reconnect_after_close: Duration,
    pub reconnect_after_error: Duration,
    pub connect_timeout: Duration,
    pub quote_timeout: Duration,
    pub notify_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            feed_url: "wss://ws.twelvedata.com/v1".to_string(),
            feed_api_key: String::new(),
            sweep_interval: Duration::from_secs(15 * 60),
            reconnect_after_close: Duration::from_secs(60),
            reconnect_after_error: Duration::from_secs(5 * 60),
            connect_timeout: Duration::from_secs(30),
            quote_timeout: Duration::from_secs(10),
            notify_timeout: Duration::from_secs(15),
        }
    }
}

impl Settings {
    /// True when SendGrid credentials look real; otherwise notifications are logged.
    pub fn sendgrid_enabled(&self) -> bool {
        self.sendgrid_api_key.starts_with("SG.")
    }
}

fn secs_var(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn string_var(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn load() -> Settings {
    // Loads .env if present (no crash if missing)
    dotenvy::dotenv().ok();

    let mongodb_uri = string_var("MONGODB_URI", "mongodb://localhost:27017");
    let mongodb_db = string_var("MONGODB_DB", "stockalerts");
    let host = string_var("HOST", "127.0.0.1");

    let port = env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let store_backend = match env::var("ALERT_STORE").as_deref() {
        Ok("memory") => StoreBackend::Memory,
        _ => StoreBackend::Mongo,
    };

    let defaults = MonitorSettings::default();
    let monitor = MonitorSettings {
        feed_url: string_var("TWELVEDATA_WS_URL", &defaults.feed_url),
        feed_api_key: string_var("TWELVEDATA_API_KEY", ""),
        sweep_interval: secs_var("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
        reconnect_after_close: secs_var("RECONNECT_AFTER_CLOSE_SECS", defaults.reconnect_after_close),
        reconnect_after_error: secs_var("RECONNECT_AFTER_ERROR_SECS", defaults.reconnect_after_error),
        connect_timeout: secs_var("FEED_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
        quote_timeout: secs_var("QUOTE_TIMEOUT_SECS", defaults.quote_timeout),
        notify_timeout: secs_var("NOTIFY_TIMEOUT_SECS", defaults.notify_timeout),
    };

    Settings {
        mongodb_uri,
        mongodb_db,
        host,
        port,
        store_backend,
        eodhd_api_key: string_var("EODHD_API_KEY", ""),
        eodhd_base_url: string_var("EODHD_BASE_URL", "https://eodhd.com/api"),
        eodhd_exchange: string_var("EODHD_EXCHANGE", "HOSE"),
        sendgrid_api_key: string_var("SENDGRID_API_KEY", ""),
        from_email: string_var("FROM_EMAIL", "alerts@vnstockmarket.com"),
        from_name: string_var("FROM_NAME", "VN Stock Market"),
        frontend_url: string_var("FRONTEND_URL", "http://localhost:3000"),
        monitor,
    }
}
