use clap::Args;
use corvid_db::{IndexOptions, Store};
use serde_json::json;
use tracing::info;

use super::{emit, parse_document, CollectionArg};

/// Arguments for the create-index command.
#[derive(Args, Clone, Debug)]
pub struct CreateIndexArgs {
    #[command(flatten)]
    pub target: CollectionArg,
    /// Key document: {"field": 1 | -1, ...} or {"field": "text"}
    #[arg(short, long)]
    pub keys:   String,
    /// Index name (default: derived from the keys)
    #[arg(long)]
    pub name:   Option<String>,
    /// Reject documents that duplicate an indexed key
    #[arg(long)]
    pub unique: bool,
}

/// Create an index and print its name.
pub async fn run(store: &Store, args: CreateIndexArgs) -> corvid_db::Result<()> {
    let collection = store.collection(&args.target.collection).await?;
    let keys = parse_document(&args.keys).await?;
    let name = collection
        .create_index(
            &keys,
            IndexOptions {
                name:   args.name,
                unique: args.unique,
            },
        )
        .await?;
    info!(
        "Index '{}' ready on '{}'",
        name, args.target.collection
    );
    emit([json!({"name": name})]).await
}
