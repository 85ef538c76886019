use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    aggregation::{Pipeline, Stage},
    CorvidError,
    Document,
    Result,
};
use super::coll::Collection;

#[allow(clippy::multiple_inherent_impl, reason = "multiple impl blocks for Collection are intentional for organization")]
impl Collection {
    /// Runs an aggregation pipeline over a snapshot of the collection.
    ///
    /// Supported stages: `$match`, `$group`, `$project`, `$sort`, `$skip`, `$limit` and
    /// `$count`. A leading `$match` uses the collection's indexes to pick its input.
    ///
    /// # Arguments
    ///
    /// * `stages` - Stage documents, each with exactly one stage operator
    ///
    /// # Returns
    ///
    /// Returns the documents produced by the last stage.
    ///
    /// # Errors
    ///
    /// - `CorvidError::UnsupportedStage` for unknown stage operators
    /// - Parse and evaluation errors of the individual stages
    ///
    /// # Example
    ///
    /// ```rust
    /// use corvid_db::{Document, Store};
    /// use serde_json::json;
    ///
    /// # async fn example() -> corvid_db::Result<()> {
    /// let store = Store::new();
    /// let students = store.collection("students").await?;
    /// for (major, gpa) in [("CS", 3.8), ("Math", 3.5), ("CS", 3.5)] {
    ///     students
    ///         .insert_one(Document::from_json(json!({"major": major, "gpa": gpa}))?)
    ///         .await?;
    /// }
    ///
    /// let stages = [
    ///     Document::from_json(json!({"$group": {"_id": "$major", "avg_gpa": {"$avg": "$gpa"}}}))?,
    ///     Document::from_json(json!({"$sort": {"avg_gpa": -1}}))?,
    /// ];
    /// let output = students.aggregate(&stages).await?;
    /// assert_eq!(output[0].to_json(), json!({"_id": "CS", "avg_gpa": 3.65}));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn aggregate(&self, stages: &[Document]) -> Result<Vec<Document>> {
        self.aggregate_with_cancel(stages, &CancellationToken::new())
            .await
    }

    /// Runs an aggregation pipeline, checking `cancel` before every stage.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::Cancelled` naming the next stage once `cancel` is triggered, in
    /// addition to the errors of [`Collection::aggregate`].
    pub async fn aggregate_with_cancel(&self, stages: &[Document], cancel: &CancellationToken) -> Result<Vec<Document>> {
        trace!(
            "Aggregating '{}' with {} stages",
            self.name,
            stages.len()
        );
        let mut pipeline = Pipeline::parse(stages)?;

        let input: Vec<Arc<Document>> = {
            let state = self.state.read().await;
            if pipeline.has_text() {
                let fields = state.indexes.text_fields().ok_or_else(|| {
                    CorvidError::invalid("$text", "a text index is required for $text queries")
                })?;
                pipeline.bind_text_fields(&fields);
            }
            match pipeline.stages().first() {
                Some(&Stage::Match(ref filter)) => {
                    self.matching(&state, filter, None)
                        .into_iter()
                        .map(|(_, document)| document)
                        .collect()
                },
                _ => state.snapshot(),
            }
        };

        let output = pipeline.run(input, cancel).await?;
        debug!(
            "Aggregation on '{}' produced {} documents",
            self.name,
            output.len()
        );
        Ok(output)
    }
}
