use std::collections::BTreeSet;

use crate::error::Result;
use crate::services::alert_store::AlertStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl SymbolDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The set of symbols with at least one active, unfired alert.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    symbols: BTreeSet<String>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-derives the watched set from the store and returns what changed.
    pub async fn recompute(&mut self, store: &dyn AlertStore) -> Result<SymbolDiff> {
        let current: BTreeSet<String> = store
            .list_active(true)
            .await?
            .into_iter()
            .map(|a| a.symbol.to_uppercase())
            .collect();

        Ok(self.replace(current))
    }

    pub fn replace(&mut self, current: BTreeSet<String>) -> SymbolDiff {
        let added = current.difference(&self.symbols).cloned().collect();
        let removed = self.symbols.difference(&current).cloned().collect();
        self.symbols = current;
        SymbolDiff { added, removed }
    }

    pub fn symbols(&self) -> &BTreeSet<String> {
        &self.symbols
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
