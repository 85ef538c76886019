//! Write models and per-item reporting for `bulk_write`.

use serde::{Deserialize, Serialize};

use crate::{
    results::{DeleteResult, InsertOneResult, UpdateResult},
    CorvidError,
    Document,
    Result,
    Value,
};

/// One request inside a bulk write.
///
/// Filters and update bodies stay raw until the item runs, so a malformed update fails
/// only its own item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    UpdateMany {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    ReplaceOne {
        filter:      Document,
        replacement: Document,
        upsert:      bool,
    },
    DeleteOne {
        filter: Document,
    },
    DeleteMany {
        filter: Document,
    },
}

/// Reads the body of a write model, rejecting fields it does not know.
struct ModelBody<'a> {
    operation: &'a str,
    body:      &'a Document,
}

impl<'a> ModelBody<'a> {
    fn new(operation: &'a str, body: &'a Value, allowed: &[&str]) -> Result<Self> {
        let body = body
            .as_document()
            .ok_or_else(|| CorvidError::invalid(operation, "expected a document"))?;
        if let Some(unknown) = body.keys().find(|key| !allowed.contains(key)) {
            return Err(CorvidError::invalid(
                operation,
                format!("unknown field '{}'", unknown),
            ));
        }
        Ok(Self {
            operation,
            body,
        })
    }

    fn document(&self, field: &str) -> Result<Document> {
        match self.body.get(field) {
            Some(&Value::Document(ref doc)) => Ok(doc.clone()),
            Some(other) => {
                Err(CorvidError::invalid(
                    self.operation,
                    format!("'{}' must be a document, found {}", field, other.kind()),
                ))
            },
            None => {
                Err(CorvidError::invalid(
                    self.operation,
                    format!("missing '{}'", field),
                ))
            },
        }
    }

    fn flag(&self, field: &str) -> Result<bool> {
        match self.body.get(field) {
            None => Ok(false),
            Some(value) => {
                value.as_bool().ok_or_else(|| {
                    CorvidError::invalid(
                        self.operation,
                        format!("'{}' must be a boolean", field),
                    )
                })
            },
        }
    }
}

impl WriteModel {
    /// Parses a request document such as `{"updateOne": {"filter": {...}, "update": {...}}}`.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::UnknownOperator` for an unknown request type and
    /// `CorvidError::InvalidArgument` for a malformed body.
    ///
    /// # Example
    ///
    /// ```rust
    /// use corvid_db::{Document, WriteModel};
    /// use serde_json::json;
    ///
    /// let request = Document::from_json(json!({"deleteOne": {"filter": {"student_id": 1006}}})).unwrap();
    /// let model = WriteModel::parse(&request).unwrap();
    /// assert_eq!(model.name(), "deleteOne");
    /// ```
    pub fn parse(request: &Document) -> Result<Self> {
        let mut entries = request.iter();
        let (Some((name, body)), None) = (entries.next(), entries.next())
        else {
            return Err(CorvidError::invalid(
                "bulkWrite",
                "each request must have exactly one field",
            ));
        };
        let model = match name {
            "insertOne" => {
                let body = ModelBody::new(name, body, &["document"])?;
                Self::InsertOne {
                    document: body.document("document")?,
                }
            },
            "updateOne" | "updateMany" => {
                let body = ModelBody::new(name, body, &["filter", "update", "upsert"])?;
                let (filter, update, upsert) = (
                    body.document("filter")?,
                    body.document("update")?,
                    body.flag("upsert")?,
                );
                if name == "updateOne" {
                    Self::UpdateOne {
                        filter,
                        update,
                        upsert,
                    }
                }
                else {
                    Self::UpdateMany {
                        filter,
                        update,
                        upsert,
                    }
                }
            },
            "replaceOne" => {
                let body = ModelBody::new(name, body, &["filter", "replacement", "upsert"])?;
                Self::ReplaceOne {
                    filter:      body.document("filter")?,
                    replacement: body.document("replacement")?,
                    upsert:      body.flag("upsert")?,
                }
            },
            "deleteOne" | "deleteMany" => {
                let filter = ModelBody::new(name, body, &["filter"])?.document("filter")?;
                if name == "deleteOne" {
                    Self::DeleteOne {
                        filter,
                    }
                }
                else {
                    Self::DeleteMany {
                        filter,
                    }
                }
            },
            other => return Err(CorvidError::unknown_operator("bulkWrite", other)),
        };
        Ok(model)
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self> { Self::parse(&Document::from_json(json)?) }

    /// The request type name as written in request documents.
    pub const fn name(&self) -> &'static str {
        match *self {
            Self::InsertOne {
                ..
            } => "insertOne",
            Self::UpdateOne {
                ..
            } => "updateOne",
            Self::UpdateMany {
                ..
            } => "updateMany",
            Self::ReplaceOne {
                ..
            } => "replaceOne",
            Self::DeleteOne {
                ..
            } => "deleteOne",
            Self::DeleteMany {
                ..
            } => "deleteMany",
        }
    }
}

/// Options for `bulk_write`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkOptions {
    /// Stop at the first failing item; later items are reported as not executed.
    pub ordered: bool,
}

/// What a successful item did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted(InsertOneResult),
    Updated(UpdateResult),
    Deleted(DeleteResult),
}

/// Status of one item of a bulk write.
#[derive(Debug)]
pub enum BulkItemStatus {
    Succeeded(WriteOutcome),
    Failed(CorvidError),
    /// An earlier item failed in an ordered batch.
    NotExecuted,
}

/// Per-item report of a bulk write, in request order.
#[derive(Debug)]
pub struct BulkItemResult {
    pub index:     usize,
    pub operation: &'static str,
    pub status:    BulkItemStatus,
}

/// Result of `bulk_write`: one entry per request plus aggregate counts over the items that
/// succeeded.
#[derive(Debug, Default)]
pub struct BulkWriteResult {
    pub items:          Vec<BulkItemResult>,
    pub inserted_count: usize,
    pub matched_count:  usize,
    pub modified_count: usize,
    pub deleted_count:  usize,
    pub upserted_count: usize,
}

impl BulkWriteResult {
    pub(crate) fn record(&mut self, index: usize, operation: &'static str, outcome: Result<WriteOutcome>) {
        let status = match outcome {
            Ok(outcome) => {
                match outcome {
                    WriteOutcome::Inserted(_) => self.inserted_count = self.inserted_count.saturating_add(1),
                    WriteOutcome::Updated(ref result) => {
                        self.matched_count = self.matched_count.saturating_add(result.matched_count);
                        self.modified_count = self.modified_count.saturating_add(result.modified_count);
                        if result.upserted_id.is_some() {
                            self.upserted_count = self.upserted_count.saturating_add(1);
                        }
                    },
                    WriteOutcome::Deleted(ref result) => {
                        self.deleted_count = self.deleted_count.saturating_add(result.deleted_count);
                    },
                }
                BulkItemStatus::Succeeded(outcome)
            },
            Err(error) => BulkItemStatus::Failed(error),
        };
        self.items.push(BulkItemResult {
            index,
            operation,
            status,
        });
    }

    pub(crate) fn skip(&mut self, index: usize, operation: &'static str) {
        self.items.push(BulkItemResult {
            index,
            operation,
            status: BulkItemStatus::NotExecuted,
        });
    }

    /// Items that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &CorvidError)> {
        self.items.iter().filter_map(|item| {
            match item.status {
                BulkItemStatus::Failed(ref error) => Some((item.index, error)),
                BulkItemStatus::Succeeded(_) | BulkItemStatus::NotExecuted => None,
            }
        })
    }

    /// Returns true if every item succeeded.
    pub fn is_success(&self) -> bool {
        self.items
            .iter()
            .all(|item| matches!(item.status, BulkItemStatus::Succeeded(_)))
    }

    /// Summarises the result as a document, errors rendered as messages.
    pub fn to_document(&self) -> Document {
        let items: Vec<Value> = self
            .items
            .iter()
            .map(|item| {
                let mut entry = Document::new();
                entry.insert("index", Value::Int(i64::try_from(item.index).unwrap_or(i64::MAX)));
                entry.insert("operation", item.operation);
                match item.status {
                    BulkItemStatus::Succeeded(ref outcome) => {
                        entry.insert("status", "ok");
                        match *outcome {
                            WriteOutcome::Inserted(ref result) => {
                                entry.insert("inserted_id", result.inserted_id.clone());
                            },
                            WriteOutcome::Updated(ref result) => {
                                entry.insert("matched", count(result.matched_count));
                                entry.insert("modified", count(result.modified_count));
                                if let Some(ref id) = result.upserted_id {
                                    entry.insert("upserted_id", id.clone());
                                }
                            },
                            WriteOutcome::Deleted(ref result) => {
                                entry.insert("deleted", count(result.deleted_count));
                            },
                        }
                    },
                    BulkItemStatus::Failed(ref error) => {
                        entry.insert("status", "failed");
                        entry.insert("error", error.to_string());
                    },
                    BulkItemStatus::NotExecuted => {
                        entry.insert("status", "not_executed");
                    },
                }
                Value::Document(entry)
            })
            .collect();
        let mut summary = Document::new();
        summary.insert("inserted", count(self.inserted_count));
        summary.insert("matched", count(self.matched_count));
        summary.insert("modified", count(self.modified_count));
        summary.insert("deleted", count(self.deleted_count));
        summary.insert("upserted", count(self.upserted_count));
        summary.insert("items", items);
        summary
    }
}

fn count(n: usize) -> Value { Value::Int(i64::try_from(n).unwrap_or(i64::MAX)) }

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_write_models() {
        let insert = WriteModel::from_json(json!({"insertOne": {"document": {"name": "Grace Lee"}}})).unwrap();
        assert!(matches!(insert, WriteModel::InsertOne { .. }));

        let update = WriteModel::from_json(json!({
            "updateOne": {"filter": {"student_id": 1001}, "update": {"$set": {"gpa": 3.88}}}
        }))
        .unwrap();
        assert!(matches!(update, WriteModel::UpdateOne { upsert: false, .. }));

        let many = WriteModel::from_json(json!({
            "updateMany": {"filter": {}, "update": {"$inc": {"age": 1}}, "upsert": true}
        }))
        .unwrap();
        assert!(matches!(many, WriteModel::UpdateMany { upsert: true, .. }));

        let replace = WriteModel::from_json(json!({
            "replaceOne": {"filter": {"_id": 1}, "replacement": {"name": "X"}}
        }))
        .unwrap();
        assert_eq!(replace.name(), "replaceOne");

        let delete = WriteModel::from_json(json!({"deleteMany": {"filter": {"is_active": false}}})).unwrap();
        assert_eq!(delete.name(), "deleteMany");
    }

    #[test]
    fn test_parse_rejects_malformed_requests() {
        assert!(matches!(
            WriteModel::from_json(json!({"upsertOne": {}})),
            Err(CorvidError::UnknownOperator { .. })
        ));
        assert!(WriteModel::from_json(json!({"insertOne": {}})).is_err());
        assert!(WriteModel::from_json(json!({"deleteOne": {"filter": 5}})).is_err());
        assert!(WriteModel::from_json(json!({"deleteOne": {"filter": {}, "extra": 1}})).is_err());
        assert!(WriteModel::from_json(json!({"updateOne": {"filter": {}, "update": {}, "upsert": "yes"}})).is_err());
        assert!(WriteModel::from_json(json!({"insertOne": {"document": {}}, "deleteOne": {"filter": {}}})).is_err());
    }

    #[test]
    fn test_result_counts_and_summary() {
        let mut result = BulkWriteResult::default();
        result.record(
            0,
            "insertOne",
            Ok(WriteOutcome::Inserted(InsertOneResult {
                inserted_id: Value::Int(7),
            })),
        );
        result.record(
            1,
            "updateOne",
            Err(CorvidError::invalid("$inc", "boom")),
        );
        result.record(
            2,
            "deleteOne",
            Ok(WriteOutcome::Deleted(DeleteResult {
                deleted_count: 1,
            })),
        );
        result.skip(3, "deleteMany");

        assert_eq!(result.inserted_count, 1);
        assert_eq!(result.deleted_count, 1);
        assert!(!result.is_success());
        assert_eq!(result.failures().map(|(i, _)| i).collect::<Vec<_>>(), [1]);

        let summary = result.to_document().to_json();
        assert_eq!(summary["items"][1]["status"], json!("failed"));
        assert_eq!(summary["items"][3]["status"], json!("not_executed"));
        assert_eq!(summary["inserted"], json!(1));
    }
}
