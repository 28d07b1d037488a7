use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Push,
    Poll,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceObservation {
    pub price: Decimal,
    pub source: PriceSource,
    pub observed_at: DateTime<Utc>,
}

/// Last observed price per symbol. Not authoritative; no history.
#[derive(Default)]
pub struct PriceCache {
    latest: RwLock<HashMap<String, PriceObservation>>,
}

impl PriceCache {
    pub fn record(&self, symbol: &str, price: Decimal, source: PriceSource, observed_at: DateTime<Utc>) {
        let mut map = self.latest.write().unwrap_or_else(|p| p.into_inner());
        map.insert(
            symbol.to_string(),
            PriceObservation {
                price,
                source,
                observed_at,
            },
        );
    }

    pub fn get(&self, symbol: &str) -> Option<PriceObservation> {
        let map = self.latest.read().unwrap_or_else(|p| p.into_inner());
        map.get(symbol).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, PriceObservation> {
        let map = self.latest.read().unwrap_or_else(|p| p.into_inner());
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
