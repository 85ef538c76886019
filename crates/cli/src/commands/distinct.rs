use clap::Args;
use corvid_db::{Store, Value};
use tracing::info;

use super::{emit, parse_document, CollectionArg};

/// Arguments for the distinct command.
#[derive(Args, Clone, Debug)]
pub struct DistinctArgs {
    #[command(flatten)]
    pub target: CollectionArg,
    /// Dotted field path
    #[arg(long)]
    pub field:  String,
    /// Filter restricting the documents considered
    #[arg(short, long)]
    pub filter: Option<String>,
}

/// Print the distinct values of a field as one JSON array.
pub async fn run(store: &Store, args: DistinctArgs) -> corvid_db::Result<()> {
    let collection = store.collection(&args.target.collection).await?;
    let filter = match args.filter {
        Some(ref filter) => Some(parse_document(filter).await?),
        None => None,
    };
    let values = collection.distinct(&args.field, filter.as_ref()).await?;
    info!(
        "Field '{}' has {} distinct values in '{}'",
        args.field,
        values.len(),
        args.target.collection
    );
    emit([Value::Array(values).to_json()]).await
}
