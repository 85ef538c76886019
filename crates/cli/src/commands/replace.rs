use clap::Args;
use corvid_db::Store;
use tracing::info;

use super::{emit, parse_document, CollectionArg};

/// Arguments for the replace command.
#[derive(Args, Clone, Debug)]
pub struct ReplaceArgs {
    #[command(flatten)]
    pub target:      CollectionArg,
    /// Filter selecting the document to replace
    #[arg(short, long)]
    pub filter:      String,
    /// Replacement document (no update operators); its `_id`, if any, must match
    #[arg(short, long)]
    pub replacement: String,
    /// Insert the replacement when nothing matches
    #[arg(long)]
    pub upsert:      bool,
}

/// Replace the first matching document.
pub async fn run(store: &Store, args: ReplaceArgs) -> corvid_db::Result<()> {
    let collection = store.collection(&args.target.collection).await?;
    let filter = parse_document(&args.filter).await?;
    let replacement = parse_document(&args.replacement).await?;
    let result = collection
        .replace_one(&filter, replacement, args.upsert)
        .await?;
    info!(
        "Replaced in '{}': matched {}, modified {}",
        args.target.collection, result.matched_count, result.modified_count
    );
    emit([serde_json::to_value(&result)?]).await
}
