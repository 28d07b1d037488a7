use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::error::{with_timeout, Result};
use crate::models::Alert;
use crate::services::alert_store::AlertStore;
use crate::services::notifier::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Fired { notification_sent: bool },
}

impl Outcome {
    pub fn fired(&self) -> bool {
        matches!(self, Outcome::Fired { .. })
    }
}

/// Decides whether an alert fires for a price and carries out the fire.
pub struct Evaluator {
    store: Arc<dyn AlertStore>,
    notifier: Arc<dyn Notifier>,
    notify_timeout: Duration,
}

impl Evaluator {
    pub fn new(store: Arc<dyn AlertStore>, notifier: Arc<dyn Notifier>, notify_timeout: Duration) -> Self {
        Self {
            store,
            notifier,
            notify_timeout,
        }
    }

    /// `alert` may be stale. The store's conditional update re-checks it against
    /// the stored row, so concurrent calls notify at most once and an edit made
    /// after loading wins over the old terms.
    pub async fn evaluate(&self, alert: &Alert, price: Decimal) -> Result<Outcome> {
        if !alert.should_fire(price) {
            return Ok(Outcome::Unchanged);
        }

        let now = Utc::now().timestamp();
        if !self.store.conditional_mark_triggered(alert, price, now).await? {
            tracing::debug!(alert_id = %alert.id, symbol = %alert.symbol, "alert already fired elsewhere");
            return Ok(Outcome::Unchanged);
        }

        tracing::info!(
            alert_id = %alert.id,
            symbol = %alert.symbol,
            condition = %alert.condition,
            target = %alert.target_price,
            price = %price,
            "alert triggered"
        );

        let mut fired = alert.clone();
        fired.triggered = true;
        fired.triggered_at = Some(now);
        fired.current_price = Some(price);

        // Failure here never rolls back the trigger and is not retried.
        let notification_sent = match with_timeout(self.notify_timeout, self.notifier.notify(&fired)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(alert_id = %alert.id, error = %e, "alert notification failed");
                false
            }
        };

        if let Err(e) = self.store.mark_notified(alert.id, notification_sent).await {
            tracing::warn!(alert_id = %alert.id, error = %e, "could not record notification status");
        }

        Ok(Outcome::Fired { notification_sent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AlertError;
    use crate::models::AlertCondition;
    use crate::services::memory_store::MemoryAlertStore;
    use async_trait::async_trait;
    use mongodb::bson::oid::ObjectId;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, _alert: &Alert) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AlertError::Notification("smtp down".into()))
            } else {
                Ok(())
            }
        }
    }

    async fn setup(fail: bool) -> (Arc<MemoryAlertStore>, Arc<CountingNotifier>, Evaluator, Alert) {
        let store = Arc::new(MemoryAlertStore::new());
        let notifier = Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
            fail,
        });
        let alert = Alert::new(ObjectId::new(), "VCB", AlertCondition::Above, dec!(100), 0);
        store.insert(&alert).await.unwrap();
        let eval = Evaluator::new(store.clone(), notifier.clone(), Duration::from_secs(1));
        (store, notifier, eval, alert)
    }

    #[tokio::test]
    async fn below_target_leaves_alert_armed() {
        let (store, notifier, eval, alert) = setup(false).await;
        assert_eq!(eval.evaluate(&alert, dec!(99.99)).await.unwrap(), Outcome::Unchanged);
        assert!(store.get(alert.id).await.unwrap().unwrap().is_armed());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_copy_cannot_fire_twice() {
        let (store, notifier, eval, alert) = setup(false).await;
        let first = eval.evaluate(&alert, dec!(100)).await.unwrap();
        let second = eval.evaluate(&alert, dec!(101)).await.unwrap();

        assert_eq!(first, Outcome::Fired { notification_sent: true });
        assert_eq!(second, Outcome::Unchanged);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);

        let stored = store.get(alert.id).await.unwrap().unwrap();
        assert!(stored.triggered);
        assert!(stored.triggered_at.is_some());
        assert!(stored.notification_sent);
        assert_eq!(stored.current_price, Some(dec!(100)));
    }

    #[tokio::test]
    async fn target_edited_after_load_is_respected() {
        let (store, notifier, eval, stale) = setup(false).await;
        let edit = crate::models::AlertEdit {
            target_price: Some(dec!(200)),
            ..Default::default()
        };
        store.update(stale.id, &edit, 1).await.unwrap();

        assert_eq!(eval.evaluate(&stale, dec!(150)).await.unwrap(), Outcome::Unchanged);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);

        let stored = store.get(stale.id).await.unwrap().unwrap();
        assert!(!stored.triggered);
        assert_eq!(stored.target_price, dec!(200));
    }

    #[tokio::test]
    async fn failed_notification_keeps_alert_fired() {
        let (store, notifier, eval, alert) = setup(true).await;
        let outcome = eval.evaluate(&alert, dec!(150)).await.unwrap();
        assert_eq!(outcome, Outcome::Fired { notification_sent: false });

        let stored = store.get(alert.id).await.unwrap().unwrap();
        assert!(stored.triggered);
        assert!(!stored.notification_sent);

        eval.evaluate(&stored, dec!(150)).await.unwrap();
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }
}
