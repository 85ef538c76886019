use clap::Args;
use corvid_db::Store;
use tracing::info;

use super::{emit, parse_document, CollectionArg};

/// Arguments for the update command.
#[derive(Args, Clone, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub target: CollectionArg,
    /// Filter selecting the documents to update
    #[arg(short, long)]
    pub filter: String,
    /// Update document made of operators, e.g. {"$set": {"gpa": 3.9}}
    #[arg(short, long)]
    pub update: String,
    /// Update every matching document instead of the first
    #[arg(long)]
    pub many:   bool,
    /// Insert a document built from the filter when nothing matches
    #[arg(long)]
    pub upsert: bool,
}

/// Apply an update and print the matched, modified and upserted counts.
///
/// # Examples
/// ```bash
/// corvid-cli --data-dir ./data update -c students \
///     --filter '{"student_id": 1006}' --update '{"$set": {"name": "Frank Miller"}}' --upsert
/// ```
pub async fn run(store: &Store, args: UpdateArgs) -> corvid_db::Result<()> {
    let collection = store.collection(&args.target.collection).await?;
    let filter = parse_document(&args.filter).await?;
    let update = parse_document(&args.update).await?;
    let result = if args.many {
        collection.update_many(&filter, &update, args.upsert).await?
    }
    else {
        collection.update_one(&filter, &update, args.upsert).await?
    };
    info!(
        "Updated '{}': matched {}, modified {}",
        args.target.collection, result.matched_count, result.modified_count
    );
    emit([serde_json::to_value(&result)?]).await
}
