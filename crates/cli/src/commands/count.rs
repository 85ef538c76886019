use clap::Args;
use corvid_db::Store;
use serde_json::json;
use tracing::info;

use super::{emit, parse_optional_document, CollectionArg};

/// Arguments for the count command.
#[derive(Args, Clone, Debug)]
pub struct CountArgs {
    #[command(flatten)]
    pub target: CollectionArg,
    /// Filter document (default: count everything)
    #[arg(short, long)]
    pub filter: Option<String>,
}

/// Count matching documents.
pub async fn run(store: &Store, args: CountArgs) -> corvid_db::Result<()> {
    let collection = store.collection(&args.target.collection).await?;
    let filter = parse_optional_document(args.filter.as_deref()).await?;
    let count = collection.count(&filter).await?;
    info!(
        "Collection '{}' has {} matching documents",
        args.target.collection, count
    );
    emit([json!({"count": count})]).await
}
