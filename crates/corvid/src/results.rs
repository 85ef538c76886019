//! Outcomes of write operations.

use serde::{Deserialize, Serialize};

use crate::Value;

/// Result of `insert_one`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOneResult {
    /// The `_id` of the inserted document, generated if the document had none.
    pub inserted_id: Value,
}

/// Result of `insert_many`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertManyResult {
    pub inserted_ids:   Vec<Value>,
    pub inserted_count: usize,
}

/// Result of `update_one`, `update_many` and `replace_one`.
///
/// `modified_count` counts documents whose content actually changed; an update that rewrites
/// a field with its current value matches without modifying.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub matched_count:  usize,
    pub modified_count: usize,
    /// Set when the operation inserted a new document through upsert.
    pub upserted_id:    Option<Value>,
}

impl UpdateResult {
    /// An update that matched nothing and inserted nothing.
    pub const fn none() -> Self {
        Self {
            matched_count:  0,
            modified_count: 0,
            upserted_id:    None,
        }
    }
}

/// Result of `delete_one` and `delete_many`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted_count: usize,
}
