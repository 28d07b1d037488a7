use mongodb::{bson::doc, Database, IndexModel};

use crate::error::Result;

pub async fn ensure_indexes(db: &Database) -> Result<()> {
    let col = db.collection::<mongodb::bson::Document>("alerts");

    // monitor scans: armed alerts, optionally per symbol
    let model = IndexModel::builder()
        .keys(doc! { "active": 1, "triggered": 1, "symbol": 1 })
        .build();
    col.create_index(model, None).await?;

    // per-user listing, newest first
    let model = IndexModel::builder()
        .keys(doc! { "user_id": 1, "created_at": -1 })
        .build();
    col.create_index(model, None).await?;

    Ok(())
}
