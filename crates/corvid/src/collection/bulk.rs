use tracing::{debug, trace, warn};

use crate::{
    bulk::{BulkOptions, BulkWriteResult, WriteModel, WriteOutcome},
    Result,
};
use super::coll::Collection;

#[allow(clippy::multiple_inherent_impl, reason = "multiple impl blocks for Collection are intentional for organization")]
impl Collection {
    /// Runs a batch of write requests in order, reporting each item separately.
    ///
    /// A failing item does not undo earlier items. Unless `options.ordered` is set, later items
    /// still run; with it, they are reported as not executed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use corvid_db::{BulkOptions, Document, Store, WriteModel};
    /// use serde_json::json;
    ///
    /// # async fn example() -> corvid_db::Result<()> {
    /// let store = Store::new();
    /// let students = store.collection("students").await?;
    /// let requests = vec![
    ///     WriteModel::from_json(json!({"insertOne": {"document": {"student_id": 1007, "name": "Grace Lee"}}}))?,
    ///     WriteModel::from_json(json!({"updateOne": {"filter": {"student_id": 1007}, "update": {"$set": {"gpa": 3.7}}}}))?,
    ///     WriteModel::from_json(json!({"deleteOne": {"filter": {"student_id": 1006}}}))?,
    /// ];
    /// let result = students.bulk_write(requests, BulkOptions::default()).await;
    /// assert!(result.is_success());
    /// assert_eq!((result.inserted_count, result.modified_count, result.deleted_count), (1, 1, 0));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bulk_write(&self, requests: Vec<WriteModel>, options: BulkOptions) -> BulkWriteResult {
        trace!(
            "Running bulk write of {} requests on '{}'",
            requests.len(),
            self.name
        );
        let mut result = BulkWriteResult::default();
        let mut stopped = false;
        for (index, request) in requests.into_iter().enumerate() {
            let operation = request.name();
            if stopped {
                result.skip(index, operation);
                continue;
            }
            let outcome = self.run_write(request).await;
            if let Err(ref e) = outcome {
                warn!("Bulk item {} ({}) on '{}' failed: {}", index, operation, self.name, e);
                stopped = options.ordered;
            }
            result.record(index, operation, outcome);
        }
        debug!(
            "Bulk write on '{}': inserted {}, matched {}, modified {}, deleted {}, upserted {}",
            self.name,
            result.inserted_count,
            result.matched_count,
            result.modified_count,
            result.deleted_count,
            result.upserted_count
        );
        result
    }

    async fn run_write(&self, request: WriteModel) -> Result<WriteOutcome> {
        let outcome = match request {
            WriteModel::InsertOne {
                document,
            } => WriteOutcome::Inserted(self.insert_one(document).await?),
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } => WriteOutcome::Updated(self.update_one(&filter, &update, upsert).await?),
            WriteModel::UpdateMany {
                filter,
                update,
                upsert,
            } => WriteOutcome::Updated(self.update_many(&filter, &update, upsert).await?),
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => WriteOutcome::Updated(self.replace_one(&filter, replacement, upsert).await?),
            WriteModel::DeleteOne {
                filter,
            } => WriteOutcome::Deleted(self.delete_one(&filter).await?),
            WriteModel::DeleteMany {
                filter,
            } => WriteOutcome::Deleted(self.delete_many(&filter).await?),
        };
        Ok(outcome)
    }
}
