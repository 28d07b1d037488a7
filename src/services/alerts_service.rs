use std::sync::OnceLock;

use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use regex::Regex;
use rust_decimal::Decimal;

use crate::error::{with_timeout, AlertError, Result};
use crate::models::{Alert, AlertCondition, AlertEdit};
use crate::monitor::ALERTS_UPDATED;
use crate::AppState;

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub user_id: ObjectId,
    pub symbol: String,
    pub target_price: Decimal,
    pub condition: AlertCondition,
}

fn symbol_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9][A-Z0-9.\-]{0,14}$").expect("valid symbol regex"))
}

pub fn normalize_symbol(raw: &str) -> Result<String> {
    let sym = raw.trim().to_uppercase();
    if !symbol_re().is_match(&sym) {
        return Err(AlertError::Validation(format!("invalid stock symbol: {raw:?}")));
    }
    Ok(sym)
}

fn validate_target(target: Decimal) -> Result<()> {
    if target <= Decimal::ZERO {
        return Err(AlertError::Validation("target price must be positive".to_string()));
    }
    Ok(())
}

/// A symbol is accepted only if a quote can be fetched for it.
async fn verify_symbol(state: &AppState, symbol: &str) -> Result<Decimal> {
    with_timeout(state.settings.monitor.quote_timeout, state.quotes.fetch_price(symbol))
        .await
        .map_err(|e| {
            tracing::debug!(symbol = %symbol, error = %e, "symbol verification failed");
            AlertError::Validation(format!("invalid stock symbol or quote unavailable: {symbol}"))
        })
}

async fn alerts_changed(state: &AppState) {
    state.monitor.on_alerts_changed().await;
    let _ = state.events_tx.send(ALERTS_UPDATED.to_string());
}

pub async fn list_user_alerts(state: &AppState, user_id: ObjectId) -> Result<Vec<Alert>> {
    state.store.list_for_user(user_id).await
}

pub async fn get_alert(state: &AppState, id: ObjectId) -> Result<Alert> {
    state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AlertError::NotFound(id.to_hex()))
}

pub async fn create_alert(state: &AppState, input: NewAlert) -> Result<Alert> {
    let symbol = normalize_symbol(&input.symbol)?;
    validate_target(input.target_price)?;
    let price = verify_symbol(state, &symbol).await?;

    let mut alert = Alert::new(
        input.user_id,
        &symbol,
        input.condition,
        input.target_price,
        Utc::now().timestamp(),
    );
    alert.current_price = Some(price);

    state.store.insert(&alert).await?;
    tracing::info!(alert_id = %alert.id, symbol = %alert.symbol, "price alert created");

    alerts_changed(state).await;
    Ok(alert)
}

/// Supplying a target or condition re-arms a fired alert.
pub async fn update_alert(state: &AppState, id: ObjectId, mut edit: AlertEdit) -> Result<Alert> {
    if edit.is_empty() {
        return Err(AlertError::Validation("nothing to update".to_string()));
    }

    let existing = get_alert(state, id).await?;

    if let Some(raw) = edit.symbol.take() {
        let sym = normalize_symbol(&raw)?;
        if sym != existing.symbol {
            verify_symbol(state, &sym).await?;
        }
        edit.symbol = Some(sym);
    }
    if let Some(target) = edit.target_price {
        validate_target(target)?;
    }

    let updated = state
        .store
        .update(id, &edit, Utc::now().timestamp())
        .await?
        .ok_or_else(|| AlertError::NotFound(id.to_hex()))?;

    tracing::info!(alert_id = %id, rearmed = edit.rearms(), "price alert updated");

    alerts_changed(state).await;
    Ok(updated)
}

pub async fn delete_alert(state: &AppState, id: ObjectId) -> Result<()> {
    if !state.store.delete(id).await? {
        return Err(AlertError::NotFound(id.to_hex()));
    }
    tracing::info!(alert_id = %id, "price alert deleted");

    alerts_changed(state).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_are_normalized() {
        assert_eq!(normalize_symbol(" vcb ").unwrap(), "VCB");
        assert_eq!(normalize_symbol("brk.b").unwrap(), "BRK.B");
    }

    #[test]
    fn junk_symbols_are_rejected() {
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("A B").is_err());
        assert!(normalize_symbol("$$$").is_err());
    }
}
