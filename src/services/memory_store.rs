use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{Alert, AlertEdit};

use super::alert_store::AlertStore;

/// In-process alert store. Every operation holds the lock for its whole
/// read-modify-write, which gives the same per-row atomicity as the Mongo store.
#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: Mutex<HashMap<ObjectId, Alert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<ObjectId, Alert>) -> T) -> T {
        let mut guard = self.alerts.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    fn select(&self, pred: impl Fn(&Alert) -> bool) -> Vec<Alert> {
        self.with(|map| {
            let mut out: Vec<Alert> = map.values().filter(|a| pred(a)).cloned().collect();
            out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
            out
        })
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn list_active(&self, unfired_only: bool) -> Result<Vec<Alert>> {
        Ok(self.select(|a| a.active && (!unfired_only || !a.triggered)))
    }

    async fn list_active_by_symbol(&self, symbol: &str) -> Result<Vec<Alert>> {
        let sym = symbol.to_uppercase();
        Ok(self.select(|a| a.is_armed() && a.symbol == sym))
    }

    async fn conditional_mark_triggered(&self, seen: &Alert, price: Decimal, at: i64) -> Result<bool> {
        Ok(self.with(|map| match map.get_mut(&seen.id) {
            Some(a)
                if a.is_armed()
                    && a.symbol == seen.symbol
                    && a.condition == seen.condition
                    && a.target_price == seen.target_price =>
            {
                a.triggered = true;
                a.triggered_at = Some(at);
                a.current_price = Some(price);
                a.notification_sent = false;
                a.updated_at = at;
                true
            }
            _ => false,
        }))
    }

    async fn mark_notified(&self, id: ObjectId, sent: bool) -> Result<()> {
        self.with(|map| {
            if let Some(a) = map.get_mut(&id) {
                a.notification_sent = sent;
            }
        });
        Ok(())
    }

    async fn record_price(&self, symbol: &str, price: Decimal) -> Result<()> {
        let sym = symbol.to_uppercase();
        self.with(|map| {
            for a in map.values_mut().filter(|a| a.is_armed() && a.symbol == sym) {
                a.current_price = Some(price);
            }
        });
        Ok(())
    }

    async fn insert(&self, alert: &Alert) -> Result<()> {
        self.with(|map| map.insert(alert.id, alert.clone()));
        Ok(())
    }

    async fn get(&self, id: ObjectId) -> Result<Option<Alert>> {
        Ok(self.with(|map| map.get(&id).cloned()))
    }

    async fn list_for_user(&self, user_id: ObjectId) -> Result<Vec<Alert>> {
        Ok(self.select(|a| a.user_id == user_id))
    }

    async fn update(&self, id: ObjectId, edit: &AlertEdit, now: i64) -> Result<Option<Alert>> {
        Ok(self.with(|map| {
            map.get_mut(&id).map(|a| {
                a.apply_edit(edit, now);
                a.clone()
            })
        }))
    }

    async fn delete(&self, id: ObjectId) -> Result<bool> {
        Ok(self.with(|map| map.remove(&id).is_some()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertCondition;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn second_conditional_mark_reports_already_fired() {
        let store = MemoryAlertStore::new();
        let alert = Alert::new(ObjectId::new(), "FPT", AlertCondition::Above, dec!(10), 1);
        store.insert(&alert).await.unwrap();

        assert!(store.conditional_mark_triggered(&alert, dec!(11), 2).await.unwrap());
        assert!(!store.conditional_mark_triggered(&alert, dec!(12), 3).await.unwrap());

        let stored = store.get(alert.id).await.unwrap().unwrap();
        assert_eq!(stored.current_price, Some(dec!(11)));
        assert_eq!(stored.triggered_at, Some(2));
    }

    #[tokio::test]
    async fn disabled_alert_cannot_be_marked() {
        let store = MemoryAlertStore::new();
        let mut alert = Alert::new(ObjectId::new(), "FPT", AlertCondition::Above, dec!(10), 1);
        alert.active = false;
        store.insert(&alert).await.unwrap();

        assert!(!store.conditional_mark_triggered(&alert, dec!(11), 2).await.unwrap());
        assert!(store.list_active(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn edited_terms_block_a_stale_mark() {
        let store = MemoryAlertStore::new();
        let seen = Alert::new(ObjectId::new(), "FPT", AlertCondition::Above, dec!(100), 1);
        store.insert(&seen).await.unwrap();

        let edit = AlertEdit {
            target_price: Some(dec!(200)),
            ..Default::default()
        };
        store.update(seen.id, &edit, 2).await.unwrap();

        assert!(!store.conditional_mark_triggered(&seen, dec!(150), 3).await.unwrap());
        let stored = store.get(seen.id).await.unwrap().unwrap();
        assert!(!stored.triggered);
        assert_eq!(stored.target_price, dec!(200));

        assert!(store.conditional_mark_triggered(&stored, dec!(250), 4).await.unwrap());
    }

    #[tokio::test]
    async fn list_active_can_include_fired_alerts() {
        let store = MemoryAlertStore::new();
        let a = Alert::new(ObjectId::new(), "HPG", AlertCondition::Below, dec!(5), 1);
        let b = Alert::new(ObjectId::new(), "HPG", AlertCondition::Below, dec!(6), 2);
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        store.conditional_mark_triggered(&a, dec!(4), 3).await.unwrap();

        assert_eq!(store.list_active(true).await.unwrap().len(), 1);
        assert_eq!(store.list_active(false).await.unwrap().len(), 2);
        assert_eq!(store.list_active_by_symbol("hpg").await.unwrap().len(), 1);
    }
}
