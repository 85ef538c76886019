use clap::Args;
use corvid_db::{Document, Store};

use super::{emit, CollectionArg};

/// Arguments for the indexes command.
#[derive(Args, Clone, Debug)]
pub struct IndexesArgs {
    #[command(flatten)]
    pub target: CollectionArg,
}

/// Print one `{key, name, unique}` description per index.
pub async fn run(store: &Store, args: IndexesArgs) -> corvid_db::Result<()> {
    let collection = store.collection(&args.target.collection).await?;
    let indexes = collection.get_indexes().await;
    emit(indexes.iter().map(Document::to_json)).await
}
