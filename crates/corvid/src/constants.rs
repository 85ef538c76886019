//! Constants for reserved field names, index names and journal layout used throughout Corvid.
//!
//! Centralized here so the engine, the journal and the CLI agree on the same spellings.

/// Name of the identifier field every stored document carries.
pub const ID_FIELD: &str = "_id";

/// Name of the implicit unique index on `_id`.
pub const ID_INDEX_NAME: &str = "_id_";

/// File extension for per-collection journal files.
pub const JOURNAL_EXTENSION: &str = "jsonl";

/// Key used to encode timestamps in JSON (`{"$date": "2022-08-15T00:00:00Z"}`).
pub const DATE_KEY: &str = "$date";

/// Maximum number of segments in a field path.
pub const MAX_PATH_DEPTH: usize = 100;

/// Maximum length of a collection name.
pub const MAX_COLLECTION_NAME_LEN: usize = 120;

/// Maximum number of `null` elements a path write may pad an array with.
pub const MAX_ARRAY_PAD: usize = 10_000;
