use clap::Args;
use corvid_db::Store;
use tracing::info;

use super::{emit, parse_document, CollectionArg};

/// Arguments for the delete command.
#[derive(Args, Clone, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub target: CollectionArg,
    /// Filter selecting the documents to delete; `{}` with `--many` empties the collection
    #[arg(short, long)]
    pub filter: String,
    /// Delete every matching document instead of the first
    #[arg(long)]
    pub many:   bool,
}

/// Delete matching documents and print the deleted count.
pub async fn run(store: &Store, args: DeleteArgs) -> corvid_db::Result<()> {
    let collection = store.collection(&args.target.collection).await?;
    let filter = parse_document(&args.filter).await?;
    let result = if args.many {
        collection.delete_many(&filter).await?
    }
    else {
        collection.delete_one(&filter).await?
    };
    info!(
        "Deleted {} documents from '{}'",
        result.deleted_count, args.target.collection
    );
    emit([serde_json::to_value(result)?]).await
}
