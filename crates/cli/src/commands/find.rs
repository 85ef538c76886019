use clap::Args;
use corvid_db::{FindOptions, Store};
use tracing::info;

use super::{emit, parse_document, parse_optional_document, CollectionArg};

/// Arguments for the find command.
#[derive(Args, Clone, Debug)]
pub struct FindArgs {
    #[command(flatten)]
    pub target:     CollectionArg,
    /// Filter document (default: match everything)
    #[arg(short, long)]
    pub filter:     Option<String>,
    /// Projection document, e.g. {"name": 1, "_id": 0}
    #[arg(short, long)]
    pub projection: Option<String>,
    /// Sort document, e.g. {"gpa": -1}
    #[arg(short, long)]
    pub sort:       Option<String>,
    /// Number of sorted matches to skip
    #[arg(long, default_value_t = 0)]
    pub skip:       usize,
    /// Maximum number of documents to print (0 means no limit)
    #[arg(short, long)]
    pub limit:      Option<usize>,
}

/// Find documents and print one JSON document per line.
///
/// # Examples
/// ```bash
/// corvid-cli --data-dir ./data find -c students \
///     --filter '{"gpa": {"$gte": 3.5}}' --sort '{"gpa": -1}' --limit 10
/// ```
pub async fn run(store: &Store, args: FindArgs) -> corvid_db::Result<()> {
    let collection = store.collection(&args.target.collection).await?;
    let filter = parse_optional_document(args.filter.as_deref()).await?;

    let mut options = FindOptions::new().skip(args.skip);
    if let Some(ref projection) = args.projection {
        options = options.projection(parse_document(projection).await?);
    }
    if let Some(ref sort) = args.sort {
        options = options.sort(parse_document(sort).await?);
    }
    if let Some(limit) = args.limit {
        options = options.limit(limit);
    }

    let documents: Vec<_> = collection
        .find(&filter, options)
        .await?
        .map(|document| document.to_json())
        .collect();
    info!(
        "Found {} documents in '{}'",
        documents.len(),
        args.target.collection
    );
    emit(documents).await
}
