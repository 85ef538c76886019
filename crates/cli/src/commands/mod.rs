use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use corvid_db::{config::StoreConfig, CorvidError, Document, Store};
use serde_json::Value as JsonValue;
use tokio::io::{AsyncWriteExt as _, BufWriter};
use tracing::{debug, trace};

/// Command handlers for the Corvid CLI.
///
/// Each submodule implements one subcommand: it parses its JSON arguments, calls the library
/// and prints the outcome as JSON on stdout.
/// Aggregate command module.
mod aggregate;
/// Bulk write command module.
mod bulk;
/// Collections listing command module.
mod collections;
/// Count command module.
mod count;
/// Create-index command module.
mod create_index;
/// Delete command module.
mod delete;
/// Distinct command module.
mod distinct;
/// Drop-collection command module.
mod drop;
/// Find command module.
mod find;
/// Indexes listing command module.
mod indexes;
/// Insert command module.
mod insert;
/// Replace command module.
mod replace;
/// Update command module.
mod update;

/// The CLI for the Corvid document query engine.
///
/// Every command runs against a store opened from `--data-dir` (journaled) or, without it, an
/// empty in-memory store. Documents, filters and pipelines are passed as JSON; an argument
/// starting with `@` names a file to read the JSON from.
#[derive(Parser)]
#[command(name = "corvid-cli", version, about)]
pub struct Cli {
    #[command(subcommand)]
    /// The subcommand to execute.
    pub command: Commands,

    /// Directory holding the collection journals
    #[arg(long, global = true, env = "CORVID_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Store configuration file (JSON); `--data-dir` takes precedence over its `data_dir`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (can be used multiple times: -v for info, -vv for debug, -vvv for
    /// trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Enumeration of all available CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Insert one document, or every document of a JSON array
    Insert(insert::InsertArgs),
    /// Find documents matching a filter
    Find(find::FindArgs),
    /// Count documents matching a filter
    Count(count::CountArgs),
    /// List the distinct values of a field
    Distinct(distinct::DistinctArgs),
    /// Apply update operators to the first (or every) matching document
    Update(update::UpdateArgs),
    /// Replace the first matching document
    Replace(replace::ReplaceArgs),
    /// Delete the first (or every) matching document
    Delete(delete::DeleteArgs),
    /// Run an aggregation pipeline
    Aggregate(aggregate::AggregateArgs),
    /// Create an index
    #[command(name = "create-index")]
    CreateIndex(create_index::CreateIndexArgs),
    /// List the indexes of a collection
    Indexes(indexes::IndexesArgs),
    /// Run a batch of write requests
    Bulk(bulk::BulkArgs),
    /// List the collections of the store
    Collections,
    /// Drop a collection
    Drop(drop::DropArgs),
}

/// The collection a command operates on.
#[derive(Args, Clone, Debug)]
pub struct CollectionArg {
    /// Collection name
    #[arg(short, long)]
    pub collection: String,
}

/// Execute the command selected on the command line.
///
/// # Errors
/// Returns the error of opening the store, parsing the arguments or running the operation.
pub async fn run_command(cli: Cli) -> corvid_db::Result<()> {
    let store = open_store(cli.data_dir, cli.config).await?;
    match cli.command {
        Commands::Insert(args) => insert::run(&store, args).await,
        Commands::Find(args) => find::run(&store, args).await,
        Commands::Count(args) => count::run(&store, args).await,
        Commands::Distinct(args) => distinct::run(&store, args).await,
        Commands::Update(args) => update::run(&store, args).await,
        Commands::Replace(args) => replace::run(&store, args).await,
        Commands::Delete(args) => delete::run(&store, args).await,
        Commands::Aggregate(args) => aggregate::run(&store, args).await,
        Commands::CreateIndex(args) => create_index::run(&store, args).await,
        Commands::Indexes(args) => indexes::run(&store, args).await,
        Commands::Bulk(args) => bulk::run(&store, args).await,
        Commands::Collections => collections::run(&store).await,
        Commands::Drop(args) => drop::run(&store, args).await,
    }
}

/// Opens the store described by the global flags.
async fn open_store(data_dir: Option<PathBuf>, config: Option<PathBuf>) -> corvid_db::Result<Store> {
    let mut store_config = match config {
        Some(path) => StoreConfig::from_file(&path).await?,
        None => StoreConfig::default(),
    };
    if let Some(data_dir) = data_dir {
        store_config.data_dir = Some(data_dir);
    }
    debug!("Opening store with data dir {:?}", store_config.data_dir);
    Store::open(store_config).await
}

/// Parses a JSON argument, reading it from a file when it starts with `@`.
pub async fn parse_json(argument: &str) -> corvid_db::Result<JsonValue> {
    let text = match argument.strip_prefix('@') {
        Some(path) => {
            trace!("Reading JSON argument from {}", path);
            tokio::fs::read_to_string(path).await?
        },
        None => argument.to_owned(),
    };
    Ok(serde_json::from_str(&text)?)
}

/// Parses a JSON argument that must be a single document.
pub async fn parse_document(argument: &str) -> corvid_db::Result<Document> { Document::from_json(parse_json(argument).await?) }

/// Parses an optional document argument, defaulting to the empty document.
pub async fn parse_optional_document(argument: Option<&str>) -> corvid_db::Result<Document> {
    match argument {
        Some(argument) => parse_document(argument).await,
        None => Ok(Document::new()),
    }
}

/// Parses a JSON argument that must be an array of documents.
pub async fn parse_documents(argument: &str, operation: &str) -> corvid_db::Result<Vec<Document>> {
    match parse_json(argument).await? {
        JsonValue::Array(items) => items.into_iter().map(Document::from_json).collect(),
        _ => {
            Err(CorvidError::InvalidArgument {
                operation: operation.to_owned(),
                message:   "expected a JSON array of documents".to_owned(),
            })
        },
    }
}

/// Writes each value as one line of compact JSON on stdout.
pub async fn emit<I>(values: I) -> corvid_db::Result<()>
where
    I: IntoIterator<Item = JsonValue>,
{
    let mut stdout = BufWriter::new(tokio::io::stdout());
    for value in values {
        let mut line = serde_json::to_vec(&value)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
    }
    stdout.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("corvid-cli").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_parsing() {
        let cli = parse(&["find", "-c", "students", "--filter", r#"{"major": "Physics"}"#, "--limit", "5"]);
        match cli.command {
            Commands::Find(args) => {
                assert_eq!(args.target.collection, "students");
                assert_eq!(args.filter.as_deref(), Some(r#"{"major": "Physics"}"#));
                assert_eq!(args.limit, Some(5));
            },
            _ => panic!("Expected Find command"),
        }

        let cli = parse(&[
            "--data-dir",
            "/tmp/corvid",
            "create-index",
            "-c",
            "students",
            "--keys",
            r#"{"student_id": 1}"#,
            "--unique",
        ]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/corvid")));
        match cli.command {
            Commands::CreateIndex(args) => {
                assert!(args.unique);
                assert!(args.name.is_none());
            },
            _ => panic!("Expected CreateIndex command"),
        }
    }

    #[test]
    fn test_cli_verbose_and_json_parsing() {
        let cli = parse(&["-vv", "collections"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.json);
        let cli = parse(&["collections", "--json"]);
        assert!(cli.json);
    }

    #[test]
    fn test_missing_required_args() {
        assert!(
            Cli::try_parse_from(["corvid-cli", "insert", "{}"]).is_err(),
            "insert should require a collection"
        );
        assert!(
            Cli::try_parse_from(["corvid-cli", "update", "-c", "students", "--filter", "{}"]).is_err(),
            "update should require an update document"
        );
        assert!(Cli::try_parse_from(["corvid-cli", "invalid-command"]).is_err());
    }

    #[tokio::test]
    async fn test_parse_json_arguments() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("docs.json");
        tokio::fs::write(&path, r#"[{"name": "Alice"}, {"name": "Bob"}]"#)
            .await
            .unwrap();

        let documents = parse_documents(&format!("@{}", path.display()), "insert")
            .await
            .unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(
            parse_document(r#"{"gpa": {"$gt": 3.5}}"#).await.unwrap().to_json(),
            json!({"gpa": {"$gt": 3.5}})
        );
        assert!(parse_documents("{}", "insert").await.is_err());
        assert!(parse_document("[1, 2]").await.is_err());
        assert!(parse_json("{not json").await.is_err());
        assert!(parse_optional_document(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commands_share_journaled_store() {
        let temp_dir = tempdir().unwrap();
        let data_dir = temp_dir.path().to_string_lossy().to_string();
        let run = |args: &[&str]| {
            let mut full = vec!["--data-dir", data_dir.as_str()];
            full.extend_from_slice(args);
            run_command(parse(&full))
        };

        run(&["insert", "-c", "students", r#"[{"_id": 1, "major": "Physics"}, {"_id": 2, "major": "Math"}]"#])
            .await
            .unwrap();
        run(&["create-index", "-c", "students", "--keys", r#"{"major": 1}"#])
            .await
            .unwrap();
        run(&[
            "update",
            "-c",
            "students",
            "--filter",
            r#"{"_id": 2}"#,
            "--update",
            r#"{"$set": {"major": "Physics"}}"#,
        ])
        .await
        .unwrap();

        let store = open_store(Some(temp_dir.path().to_path_buf()), None).await.unwrap();
        let students = store.collection("students").await.unwrap();
        let physics = Document::from_json(json!({"major": "Physics"})).unwrap();
        assert_eq!(students.count(&physics).await.unwrap(), 2);
        assert_eq!(students.get_indexes().await.len(), 2);

        run(&["drop", "-c", "students"]).await.unwrap();
        let store = open_store(Some(temp_dir.path().to_path_buf()), None).await.unwrap();
        assert!(store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_command_errors_propagate() {
        let result = run_command(parse(&["insert", "-c", "bad name!", "{}"])).await;
        assert!(matches!(result, Err(CorvidError::InvalidCollectionName { .. })));

        let result = run_command(parse(&["aggregate", "-c", "students", r#"[{"$lookup": {}}]"#])).await;
        assert!(matches!(result, Err(CorvidError::UnsupportedStage { .. })));
    }
}
