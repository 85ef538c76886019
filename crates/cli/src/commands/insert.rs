use clap::Args;
use corvid_db::{Store, Value};
use serde_json::{json, Value as JsonValue};
use tracing::info;

use super::{emit, parse_json, CollectionArg};

/// Arguments for the insert command.
#[derive(Args, Clone, Debug)]
pub struct InsertArgs {
    #[command(flatten)]
    pub target:   CollectionArg,
    /// Document to insert, or an array of documents inserted all-or-nothing
    pub document: String,
}

/// Insert one or many documents and print the inserted ids.
///
/// # Arguments
/// * `store` - The store to operate on
/// * `args` - The parsed command-line arguments for insert
///
/// # Returns
/// Returns `Ok(())` on success, or a `CorvidError` on failure.
pub async fn run(store: &Store, args: InsertArgs) -> corvid_db::Result<()> {
    let collection = store.collection(&args.target.collection).await?;
    let output = match parse_json(&args.document).await? {
        JsonValue::Array(items) => {
            let documents = items
                .into_iter()
                .map(corvid_db::Document::from_json)
                .collect::<corvid_db::Result<Vec<_>>>()?;
            let result = collection.insert_many(documents).await?;
            info!(
                "Inserted {} documents into '{}'",
                result.inserted_count, args.target.collection
            );
            json!({
                "inserted_ids": result.inserted_ids.iter().map(Value::to_json).collect::<Vec<_>>(),
                "inserted_count": result.inserted_count,
            })
        },
        document => {
            let result = collection
                .insert_one(corvid_db::Document::from_json(document)?)
                .await?;
            info!(
                "Inserted document {} into '{}'",
                result.inserted_id, args.target.collection
            );
            json!({"inserted_id": result.inserted_id.to_json()})
        },
    };
    emit([output]).await
}
