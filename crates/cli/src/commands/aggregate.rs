use clap::Args;
use corvid_db::Store;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{emit, parse_documents, CollectionArg};

/// Arguments for the aggregate command.
#[derive(Args, Clone, Debug)]
pub struct AggregateArgs {
    #[command(flatten)]
    pub target:   CollectionArg,
    /// Pipeline as a JSON array of stage documents
    pub pipeline: String,
}

/// Run an aggregation pipeline and print one JSON document per line.
///
/// Ctrl-C cancels the pipeline before its next stage.
///
/// # Examples
/// ```bash
/// corvid-cli --data-dir ./data aggregate -c students \
///     '[{"$group": {"_id": "$major", "avg_gpa": {"$avg": "$gpa"}}}, {"$sort": {"avg_gpa": -1}}]'
/// ```
pub async fn run(store: &Store, args: AggregateArgs) -> corvid_db::Result<()> {
    let collection = store.collection(&args.target.collection).await?;
    let stages = parse_documents(&args.pipeline, "aggregate").await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling aggregation");
            on_interrupt.cancel();
        }
    });
    let output = collection.aggregate_with_cancel(&stages, &cancel).await;
    watcher.abort();

    let output = output?;
    info!(
        "Aggregation on '{}' produced {} documents",
        args.target.collection,
        output.len()
    );
    emit(output.iter().map(corvid_db::Document::to_json)).await
}
