use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::{Collection, Database};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{Alert, AlertEdit};

/// Durable alert records.
///
/// `conditional_mark_triggered` is the only mutual-exclusion point the monitor
/// relies on: it must flip `triggered` atomically and report whether this call
/// was the one that did it.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Active alerts; with `unfired_only` the triggered ones are left out.
    async fn list_active(&self, unfired_only: bool) -> Result<Vec<Alert>>;

    /// Active, unfired alerts for one symbol.
    async fn list_active_by_symbol(&self, symbol: &str) -> Result<Vec<Alert>>;

    /// Marks `seen` fired only if the stored row is still armed with the same
    /// symbol, condition and target the decision was made against. Returns
    /// false when it was already fired, disabled, deleted or edited meanwhile.
    async fn conditional_mark_triggered(&self, seen: &Alert, price: Decimal, at: i64) -> Result<bool>;

    async fn mark_notified(&self, id: ObjectId, sent: bool) -> Result<()>;

    /// Stores `price` as the last known price on every armed alert for `symbol`.
    async fn record_price(&self, symbol: &str, price: Decimal) -> Result<()>;

    async fn insert(&self, alert: &Alert) -> Result<()>;
    async fn get(&self, id: ObjectId) -> Result<Option<Alert>>;
    async fn list_for_user(&self, user_id: ObjectId) -> Result<Vec<Alert>>;
    async fn update(&self, id: ObjectId, edit: &AlertEdit, now: i64) -> Result<Option<Alert>>;
    async fn delete(&self, id: ObjectId) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct MongoAlertStore {
    db: Database,
}

impl MongoAlertStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn alerts(&self) -> Collection<Alert> {
        self.db.collection::<Alert>("alerts")
    }

    async fn find_all(&self, filter: Document, opts: Option<FindOptions>) -> Result<Vec<Alert>> {
        let cursor = self.alerts().find(filter, opts).await?;
        Ok(cursor.try_collect().await?)
    }
}

// Decimals are stored as strings, so the target compares exactly as written.
fn armed_filter(seen: &Alert) -> Document {
    doc! {
        "_id": seen.id,
        "active": true,
        "triggered": false,
        "symbol": &seen.symbol,
        "condition": seen.condition.as_str(),
        "target_price": seen.target_price.to_string(),
    }
}

fn edit_set_doc(edit: &AlertEdit, now: i64) -> Document {
    let mut set = doc! { "updated_at": now };

    if let Some(symbol) = &edit.symbol {
        set.insert("symbol", symbol.to_uppercase());
    }
    if let Some(target) = edit.target_price {
        set.insert("target_price", target.to_string());
    }
    if let Some(condition) = edit.condition {
        set.insert("condition", condition.as_str());
    }
    if let Some(active) = edit.active {
        set.insert("active", active);
    }
    if edit.rearms() {
        set.insert("triggered", false);
        set.insert("triggered_at", Bson::Null);
        set.insert("notification_sent", false);
    }

    set
}

#[async_trait]
impl AlertStore for MongoAlertStore {
    async fn list_active(&self, unfired_only: bool) -> Result<Vec<Alert>> {
        let filter = if unfired_only {
            doc! { "active": true, "triggered": false }
        } else {
            doc! { "active": true }
        };
        self.find_all(filter, None).await
    }

    async fn list_active_by_symbol(&self, symbol: &str) -> Result<Vec<Alert>> {
        let sym = symbol.to_uppercase();
        self.find_all(doc! { "symbol": &sym, "active": true, "triggered": false }, None)
            .await
    }

    async fn conditional_mark_triggered(&self, seen: &Alert, price: Decimal, at: i64) -> Result<bool> {
        let res = self
            .alerts()
            .update_one(
                armed_filter(seen),
                doc! {
                    "$set": {
                        "triggered": true,
                        "triggered_at": at,
                        "current_price": price.to_string(),
                        "notification_sent": false,
                        "updated_at": at,
                    }
                },
                None,
            )
            .await?;

        Ok(res.matched_count > 0)
    }

    async fn mark_notified(&self, id: ObjectId, sent: bool) -> Result<()> {
        self.alerts()
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "notification_sent": sent } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn record_price(&self, symbol: &str, price: Decimal) -> Result<()> {
        let sym = symbol.to_uppercase();
        self.alerts()
            .update_many(
                doc! { "symbol": &sym, "active": true, "triggered": false },
                doc! { "$set": { "current_price": price.to_string() } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn insert(&self, alert: &Alert) -> Result<()> {
        self.alerts().insert_one(alert, None).await?;
        Ok(())
    }

    async fn get(&self, id: ObjectId) -> Result<Option<Alert>> {
        Ok(self.alerts().find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_for_user(&self, user_id: ObjectId) -> Result<Vec<Alert>> {
        let opts = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
        self.find_all(doc! { "user_id": user_id }, Some(opts)).await
    }

    async fn update(&self, id: ObjectId, edit: &AlertEdit, now: i64) -> Result<Option<Alert>> {
        // Partial $set so an edit that does not re-arm never clobbers a concurrent fire.
        let opts = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        Ok(self
            .alerts()
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": edit_set_doc(edit, now) }, opts)
            .await?)
    }

    async fn delete(&self, id: ObjectId) -> Result<bool> {
        let res = self.alerts().delete_one(doc! { "_id": id }, None).await?;
        Ok(res.deleted_count > 0)
    }

    async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }
}
