use std::str::FromStr;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AlertError, Result};

/// Pull-model price lookup.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal>;
}

#[derive(Clone)]
pub struct EodhdClient {
    http: Client,
    base_url: String,
    api_key: String,
    exchange: String,
}

impl EodhdClient {
    pub fn new(base_url: String, api_key: String, exchange: String) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            exchange,
        }
    }

    fn has_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub async fn real_time(&self, symbol: &str) -> Result<RealTimeQuote> {
        if !self.has_key() {
            return Err(AlertError::QuoteUnavailable {
                symbol: symbol.to_string(),
                reason: "EODHD_API_KEY is missing in .env".to_string(),
            });
        }

        let url = format!("{}/real-time/{}.{}", self.base_url, symbol, self.exchange);
        let res = self
            .http
            .get(url)
            .query(&[("api_token", self.api_key.as_str()), ("fmt", "json")])
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AlertError::QuoteUnavailable {
                symbol: symbol.to_string(),
                reason: format!("real-time quote failed: {status} {body}"),
            });
        }

        Ok(res.json::<RealTimeQuote>().await?)
    }
}

#[async_trait]
impl QuoteSource for EodhdClient {
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
        let quote = self.real_time(symbol).await?;
        quote.price().ok_or_else(|| AlertError::QuoteUnavailable {
            symbol: symbol.to_string(),
            reason: "quote has no usable close or previous close".to_string(),
        })
    }
}

// EODHD reports "NA" strings for missing fields, so prices stay untyped here.
#[derive(Debug, Deserialize)]
pub struct RealTimeQuote {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub close: Value,
    #[serde(default, rename = "previousClose")]
    pub previous_close: Value,
    #[serde(default)]
    pub timestamp: Value,
}

impl RealTimeQuote {
    /// Latest close, falling back to the previous close.
    pub fn price(&self) -> Option<Decimal> {
        positive_decimal(&self.close).or_else(|| positive_decimal(&self.previous_close))
    }
}

fn positive_decimal(v: &Value) -> Option<Decimal> {
    let d = match v {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok())),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }?;
    (d > Decimal::ZERO).then_some(d)
}
