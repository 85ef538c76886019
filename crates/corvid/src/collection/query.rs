use std::{collections::BTreeSet, sync::Arc};

use tracing::{debug, trace};

use crate::{
    document::Resolved,
    query::{FindOptions, SortSpec},
    Cursor,
    Document,
    FieldPath,
    Filter,
    Projection,
    Result,
    Value,
};
use super::coll::Collection;

#[allow(clippy::multiple_inherent_impl, reason = "multiple impl blocks for Collection are intentional for organization")]
impl Collection {
    /// Finds the documents matching `filter`.
    ///
    /// The result is a [`Cursor`] over a snapshot taken under the read lock: sorted (stable,
    /// absent fields lowest), then cut by skip and limit. Projection is applied as the cursor
    /// is consumed.
    ///
    /// # Arguments
    ///
    /// * `filter` - Filter document; `{}` matches everything
    /// * `options` - Projection, sort, skip and limit
    ///
    /// # Errors
    ///
    /// Returns parse errors of the filter, projection or sort, and
    /// `CorvidError::InvalidArgument` for `$text` without a text index.
    ///
    /// # Example
    ///
    /// ```rust
    /// use corvid_db::{Document, FindOptions, Store};
    /// use serde_json::json;
    ///
    /// # async fn example() -> corvid_db::Result<()> {
    /// let store = Store::new();
    /// let students = store.collection("students").await?;
    /// for (name, gpa) in [("Alice", 3.8), ("Bob", 3.2), ("Carol", 3.9)] {
    ///     students
    ///         .insert_one(Document::from_json(json!({"name": name, "gpa": gpa}))?)
    ///         .await?;
    /// }
    ///
    /// let options = FindOptions::new()
    ///     .projection(Document::from_json(json!({"name": 1, "_id": 0}))?)
    ///     .sort(Document::from_json(json!({"gpa": -1}))?)
    ///     .limit(2);
    /// let top: Vec<_> = students
    ///     .find(&Document::new(), options)
    ///     .await?
    ///     .map(|doc| doc.to_json())
    ///     .collect();
    /// assert_eq!(top, [json!({"name": "Carol"}), json!({"name": "Alice"})]);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn find(&self, filter: &Document, options: FindOptions) -> Result<Cursor> {
        trace!("Finding documents in '{}'", self.name);
        let mut filter = Filter::parse(filter)?;
        let projection = options
            .projection
            .as_ref()
            .map(Projection::parse)
            .transpose()?
            .unwrap_or_default();
        let sort = options
            .sort
            .as_ref()
            .map(SortSpec::parse)
            .transpose()?
            .unwrap_or_default();
        let limit = options.effective_limit();

        // Without a sort the scan can stop once skip + limit documents matched.
        let scan_limit = if sort.is_empty() {
            limit.map(|limit| limit.saturating_add(options.skip))
        }
        else {
            None
        };
        let mut documents: Vec<Arc<Document>> = {
            let state = self.state.read().await;
            state.bind_text(&mut filter)?;
            self.matching(&state, &filter, scan_limit)
                .into_iter()
                .map(|(_, document)| document)
                .collect()
        };
        let matched = documents.len();

        sort.sort(&mut documents);
        let documents: Vec<Arc<Document>> = documents
            .into_iter()
            .skip(options.skip)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        debug!(
            "Find on '{}' matched {} documents, returning {}",
            self.name,
            matched,
            documents.len()
        );
        Ok(Cursor::new(documents, projection))
    }

    /// Returns the first document `find` would return, if any.
    ///
    /// # Errors
    ///
    /// As for [`Collection::find`].
    pub async fn find_one(&self, filter: &Document, options: FindOptions) -> Result<Option<Document>> {
        let mut cursor = self.find(filter, options.limit(1)).await?;
        Ok(cursor.next())
    }

    /// Counts the documents matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns filter parse errors.
    pub async fn count(&self, filter: &Document) -> Result<usize> {
        let mut filter = Filter::parse(filter)?;
        let state = self.state.read().await;
        state.bind_text(&mut filter)?;
        let count = self.matching(&state, &filter, None).len();
        trace!("Counted {} documents in '{}'", count, self.name);
        Ok(count)
    }

    /// Returns the distinct values of `field` among documents matching `filter`.
    ///
    /// Array values contribute their elements. Values are returned in first-seen order with
    /// duplicates removed by deep equality (so `1` and `1.0` are one value). Documents missing
    /// the field contribute nothing.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidPath` for a malformed field and filter parse errors.
    ///
    /// # Example
    ///
    /// ```rust
    /// use corvid_db::{Document, Store, Value};
    /// use serde_json::json;
    ///
    /// # async fn example() -> corvid_db::Result<()> {
    /// let store = Store::new();
    /// let students = store.collection("students").await?;
    /// for major in ["Physics", "Mathematics", "Physics"] {
    ///     students.insert_one(Document::from_json(json!({"major": major}))?).await?;
    /// }
    /// let majors = students.distinct("major", None).await?;
    /// assert_eq!(majors, [Value::from("Physics"), Value::from("Mathematics")]);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn distinct(&self, field: &str, filter: Option<&Document>) -> Result<Vec<Value>> {
        let path = FieldPath::parse(field)?;
        let mut filter = match filter {
            Some(filter) => Filter::parse(filter)?,
            None => Filter::all(),
        };
        let documents = {
            let state = self.state.read().await;
            state.bind_text(&mut filter)?;
            self.matching(&state, &filter, None)
        };

        let mut seen = BTreeSet::new();
        let mut values = Vec::new();
        for (_, document) in &documents {
            let found: Vec<&Value> = match document.resolve(&path) {
                Resolved::Present(&Value::Array(ref items)) => items.iter().collect(),
                Resolved::Present(value) => vec![value],
                Resolved::Absent => Vec::new(),
            };
            for value in found {
                if seen.insert(value.clone()) {
                    values.push(value.clone());
                }
            }
        }
        debug!(
            "Distinct '{}' on '{}' found {} values",
            path,
            self.name,
            values.len()
        );
        Ok(values)
    }
}
