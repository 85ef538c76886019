//! Corvid: an embeddable, in-memory document query engine.
//!
//! Documents are ordered maps of JSON-like values stored in named collections. Collections
//! support filter-based queries with projection, sorting and pagination; operator-based updates
//! with upsert; secondary indexes (single-field, compound, unique and text) that narrow scans;
//! aggregation pipelines; and bulk writes with per-item error reporting.
//!
//! Durability is delegated to a [`persistence::Persistence`] collaborator. The bundled
//! [`persistence::JsonlJournal`] appends every committed change to a JSON-lines file per
//! collection and replays it on open.
//!
//! # Example
//!
//! ```rust
//! use corvid_db::{Document, FindOptions, IndexOptions, Store};
//! use serde_json::json;
//!
//! # async fn example() -> corvid_db::Result<()> {
//! let store = Store::new();
//! let students = store.collection("students").await?;
//! students
//!     .create_index(&Document::from_json(json!({"major": 1}))?, IndexOptions::default())
//!     .await?;
//! students
//!     .insert_many(vec![
//!         Document::from_json(json!({"name": "Alice Johnson", "major": "Physics", "gpa": 3.8}))?,
//!         Document::from_json(json!({"name": "Bob Smith", "major": "Mathematics", "gpa": 3.2}))?,
//!     ])
//!     .await?;
//!
//! let physics = students
//!     .find_one(&Document::from_json(json!({"major": "Physics"}))?, FindOptions::new())
//!     .await?;
//! assert!(physics.is_some());
//! # Ok(())
//! # }
//! ```

pub mod aggregation;
pub mod bulk;
pub mod collection;
pub mod comparison;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod document;
pub mod error;
pub mod filter;
pub mod index;
pub mod path;
pub mod persistence;
pub mod projection;
pub mod query;
pub mod results;
pub mod store;
pub mod update;
pub mod validation;
pub mod value;

pub use aggregation::Pipeline;
pub use bulk::{BulkItemResult, BulkItemStatus, BulkOptions, BulkWriteResult, WriteModel, WriteOutcome};
pub use collection::Collection;
pub use cursor::Cursor;
pub use document::Document;
pub use error::{CorvidError, Result};
pub use filter::Filter;
pub use index::{IndexOptions, IndexSpec, QueryDelegate};
pub use path::FieldPath;
pub use projection::Projection;
pub use query::{FindOptions, SortOrder, SortSpec};
pub use results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
pub use store::Store;
pub use update::UpdateSpec;
pub use value::{Value, ValueKind};
