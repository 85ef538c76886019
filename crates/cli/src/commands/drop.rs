use clap::Args;
use corvid_db::Store;
use serde_json::json;
use tracing::info;

use super::{emit, CollectionArg};

/// Arguments for the drop command.
#[derive(Args, Clone, Debug)]
pub struct DropArgs {
    #[command(flatten)]
    pub target: CollectionArg,
}

/// Drop a collection, its documents, indexes and journal.
pub async fn run(store: &Store, args: DropArgs) -> corvid_db::Result<()> {
    let dropped = store.drop_collection(&args.target.collection).await?;
    info!(
        "Collection '{}' dropped: {}",
        args.target.collection, dropped
    );
    emit([json!({"dropped": dropped})]).await
}
