use clap::Args;
use corvid_db::{BulkOptions, Store, WriteModel};
use tracing::{info, warn};

use super::{emit, parse_documents, CollectionArg};

/// Arguments for the bulk command.
#[derive(Args, Clone, Debug)]
pub struct BulkArgs {
    #[command(flatten)]
    pub target:    CollectionArg,
    /// JSON array of write requests, e.g. [{"insertOne": {"document": {...}}}, {"deleteOne":
    /// {"filter": {...}}}]
    pub requests:  String,
    /// Stop at the first failing request
    #[arg(long, conflicts_with = "unordered")]
    pub ordered:   bool,
    /// Keep going after a failing request
    #[arg(long)]
    pub unordered: bool,
}

/// Run a batch of writes and print the per-item report.
///
/// Without `--ordered` or `--unordered`, the collection's `ordered_bulk` setting decides.
/// Failed items are reported in the output; the command itself only fails on malformed
/// requests.
pub async fn run(store: &Store, args: BulkArgs) -> corvid_db::Result<()> {
    let collection = store.collection(&args.target.collection).await?;
    let requests = parse_documents(&args.requests, "bulkWrite")
        .await?
        .iter()
        .map(WriteModel::parse)
        .collect::<corvid_db::Result<Vec<_>>>()?;
    let ordered = if args.ordered || args.unordered {
        args.ordered
    }
    else {
        collection.config().ordered_bulk
    };

    let result = collection
        .bulk_write(
            requests,
            BulkOptions {
                ordered,
            },
        )
        .await;
    for (index, error) in result.failures() {
        warn!("Request {} failed: {}", index, error);
    }
    info!(
        "Bulk write on '{}': {} requests, success: {}",
        args.target.collection,
        result.items.len(),
        result.is_success()
    );
    emit([result.to_document().to_json()]).await
}
