use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    constants::ID_FIELD,
    index::RecordId,
    results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult},
    CorvidError,
    Document,
    Filter,
    Result,
    UpdateSpec,
    Value,
};
use super::coll::{Collection, CollectionState};

/// True when two versions are the same, including numeric representation.
fn unchanged(before: &Document, after: &Document) -> bool { before.to_json() == after.to_json() }

#[allow(clippy::multiple_inherent_impl, reason = "multiple impl blocks for Collection are intentional for organization")]
impl Collection {
    /// Inserts one document, generating `_id` if it has none.
    ///
    /// # Arguments
    ///
    /// * `document` - The document to insert
    ///
    /// # Returns
    ///
    /// Returns the `_id` of the stored document.
    ///
    /// # Errors
    ///
    /// - `CorvidError::DuplicateKey` if the `_id` or a unique index key already exists
    /// - `CorvidError::InvalidArgument` for an array `_id` or a top-level `$` field name
    /// - `CorvidError::Persistence` if the change could not be recorded
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
    /// let result = students
    ///     .insert_one(Document::from_json(json!({"_id": 1001, "name": "Alice Johnson"}))?)
    ///     .await?;
    /// assert_eq!(result.inserted_id, Value::Int(1001));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn insert_one(&self, document: Document) -> Result<InsertOneResult> {
        trace!("Inserting one document into '{}'", self.name);
        let mut state = self.state.write().await;
        let document = self.prepare_insert(&state, document)?;
        let inserted_id = self.commit_insert(&mut state, document).await?;
        debug!("Inserted document {} into '{}'", inserted_id, self.name);
        Ok(InsertOneResult {
            inserted_id,
        })
    }

    /// Inserts a batch of documents. Every document is validated (ids, duplicates within the
    /// batch, unique indexes) before any is inserted.
    ///
    /// # Errors
    ///
    /// Returns the first validation error, in which case nothing was inserted.
    pub async fn insert_many(&self, documents: Vec<Document>) -> Result<InsertManyResult> {
        trace!(
            "Inserting {} documents into '{}'",
            documents.len(),
            self.name
        );
        let mut state = self.state.write().await;

        let mut prepared = Vec::with_capacity(documents.len());
        for document in documents {
            let document = self.prepare_insert(&state, document)?;
            if let Some(id) = document.id() &&
                prepared.iter().any(|earlier: &Document| earlier.id() == Some(id))
            {
                return Err(CorvidError::DuplicateKey {
                    collection: self.name.clone(),
                    index:      crate::constants::ID_INDEX_NAME.to_owned(),
                    key:        id.to_string(),
                });
            }
            prepared.push(document);
        }
        let tentative: Vec<(RecordId, &Document)> = prepared
            .iter()
            .zip(state.next_record ..)
            .map(|(document, record)| (record, document))
            .collect();
        state.indexes.check_unique_batch(&tentative)?;

        let mut inserted_ids = Vec::with_capacity(prepared.len());
        for document in prepared {
            inserted_ids.push(self.commit_insert(&mut state, document).await?);
        }
        debug!(
            "Inserted {} documents into '{}'",
            inserted_ids.len(),
            self.name
        );
        Ok(InsertManyResult {
            inserted_count: inserted_ids.len(),
            inserted_ids,
        })
    }

    /// Updates the first document (in natural order) matching `filter`.
    ///
    /// With `upsert` set and no match, a document is built from the filter's equality
    /// constraints, updated, and inserted.
    ///
    /// # Errors
    ///
    /// - Parse errors of the filter or update (`UnknownOperator`, `InvalidArgument`, ...)
    /// - `CorvidError::TypeMismatch` or `CorvidError::ImmutableField` while applying the update
    /// - `CorvidError::DuplicateKey` if the new version violates a unique index
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
    /// let filter = Document::from_json(json!({"student_id": 1006}))?;
    /// let update = Document::from_json(json!({"$set": {"name": "Frank Miller", "gpa": 3.3}}))?;
    ///
    /// let first = students.update_one(&filter, &update, true).await?;
    /// assert!(first.upserted_id.is_some());
    /// let second = students.update_one(&filter, &update, true).await?;
    /// assert_eq!((second.matched_count, second.modified_count), (1, 0));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn update_one(&self, filter: &Document, update: &Document, upsert: bool) -> Result<UpdateResult> {
        let filter = Filter::parse(filter)?;
        let update = UpdateSpec::parse(update)?;
        self.update_first(filter, &update, upsert).await
    }

    /// Replaces the body of the first document matching `filter`, keeping its `_id`.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidArgument` if `replacement` contains update operators and
    /// `CorvidError::ImmutableField` if it carries a different `_id`.
    pub async fn replace_one(&self, filter: &Document, replacement: Document, upsert: bool) -> Result<UpdateResult> {
        let filter = Filter::parse(filter)?;
        let update = UpdateSpec::replacement(replacement)?;
        self.update_first(filter, &update, upsert).await
    }

    /// Stores `document` by `_id`: replaces the document with the same `_id`, or inserts it.
    /// A document without `_id` is always inserted.
    ///
    /// # Errors
    ///
    /// As for [`Collection::replace_one`] and [`Collection::insert_one`].
    pub async fn save(&self, document: Document) -> Result<UpdateResult> {
        let Some(id) = document.id().cloned()
        else {
            let inserted = self.insert_one(document).await?;
            return Ok(UpdateResult {
                upserted_id: Some(inserted.inserted_id),
                ..UpdateResult::none()
            });
        };
        let mut filter = Document::new();
        filter.insert(ID_FIELD, id);
        self.replace_one(&filter, document, true).await
    }

    async fn update_first(&self, mut filter: Filter, update: &UpdateSpec, upsert: bool) -> Result<UpdateResult> {
        trace!("Updating first match in '{}'", self.name);
        let mut state = self.state.write().await;
        state.bind_text(&mut filter)?;
        let Some((record, current)) = self.matching(&state, &filter, Some(1)).into_iter().next()
        else {
            if upsert {
                return self.upsert(&mut state, &filter, update).await;
            }
            trace!("No document matched in '{}'", self.name);
            return Ok(UpdateResult::none());
        };

        let modified = self.apply_to(&mut state, record, &current, update).await?;
        Ok(UpdateResult {
            matched_count:  1,
            modified_count: usize::from(modified),
            upserted_id:    None,
        })
    }

    /// Applies `update` to `current` and commits the result if it differs. Returns whether the
    /// document changed.
    async fn apply_to(
        &self,
        state: &mut CollectionState,
        record: RecordId,
        current: &Document,
        update: &UpdateSpec,
    ) -> Result<bool> {
        let updated = update.apply(current)?;
        if unchanged(current, &updated) {
            return Ok(false);
        }
        state.indexes.check_unique(record, &updated)?;
        self.commit_replace(state, record, updated).await?;
        Ok(true)
    }

    async fn upsert(&self, state: &mut CollectionState, filter: &Filter, update: &UpdateSpec) -> Result<UpdateResult> {
        let seed = filter.equality_seed()?;
        let document = update.apply_upsert(&seed)?;
        let document = self.prepare_insert(state, document)?;
        let upserted_id = self.commit_insert(state, document).await?;
        debug!("Upserted document {} into '{}'", upserted_id, self.name);
        Ok(UpdateResult {
            upserted_id: Some(upserted_id),
            ..UpdateResult::none()
        })
    }

    /// Updates every document matching `filter`.
    ///
    /// Matches are computed once; each new version is computed and validated before anything
    /// is written. Documents are then committed one at a time: one deleted in the meantime is
    /// skipped, and one changed in the meantime is re-checked against the filter and updated
    /// from its current version.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while applying the update to any match, in which case
    /// nothing was written. A unique-index violation found while committing stops the
    /// operation after the documents already committed.
    pub async fn update_many(&self, filter: &Document, update: &Document, upsert: bool) -> Result<UpdateResult> {
        let mut filter = Filter::parse(filter)?;
        let update = UpdateSpec::parse(update)?;
        trace!("Updating all matches in '{}'", self.name);

        let mut matches = {
            let state = self.state.read().await;
            state.bind_text(&mut filter)?;
            self.matching(&state, &filter, None)
        };
        if matches.is_empty() {
            if !upsert {
                return Ok(UpdateResult::none());
            }
            let mut state = self.state.write().await;
            matches = self.matching(&state, &filter, None);
            if matches.is_empty() {
                return self.upsert(&mut state, &filter, &update).await;
            }
        }

        let mut planned = Vec::with_capacity(matches.len());
        for (record, seen) in matches {
            let updated = update.apply(&seen)?;
            planned.push((record, seen, updated));
        }

        let mut result = UpdateResult::none();
        for (record, seen, updated) in planned {
            let mut state = self.state.write().await;
            let Some(current) = state.records.get(&record).cloned()
            else {
                continue;
            };
            let modified = if Arc::ptr_eq(&current, &seen) {
                if unchanged(&current, &updated) {
                    false
                }
                else {
                    state.indexes.check_unique(record, &updated)?;
                    self.commit_replace(&mut state, record, updated).await?;
                    true
                }
            }
            else if filter.matches(&current) {
                self.apply_to(&mut state, record, &current, &update).await?
            }
            else {
                continue;
            };
            result.matched_count = result.matched_count.saturating_add(1);
            result.modified_count = result.modified_count.saturating_add(usize::from(modified));
        }
        debug!(
            "Updated '{}': matched {}, modified {}",
            self.name, result.matched_count, result.modified_count
        );
        Ok(result)
    }

    /// Deletes the first document (in natural order) matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns filter parse errors, or `CorvidError::Persistence` if the removal could not be
    /// recorded.
    pub async fn delete_one(&self, filter: &Document) -> Result<DeleteResult> {
        let mut filter = Filter::parse(filter)?;
        let mut state = self.state.write().await;
        state.bind_text(&mut filter)?;
        let deleted = match self.matching(&state, &filter, Some(1)).first() {
            Some(&(record, _)) => self.commit_delete(&mut state, record).await?,
            None => false,
        };
        debug!("Deleted {} document from '{}'", usize::from(deleted), self.name);
        Ok(DeleteResult {
            deleted_count: usize::from(deleted),
        })
    }

    /// Deletes every document matching `filter`, one at a time.
    ///
    /// A document that changed since the match was computed is deleted only if it still
    /// matches.
    ///
    /// # Errors
    ///
    /// Returns filter parse errors, or `CorvidError::Persistence` if a removal could not be
    /// recorded.
    pub async fn delete_many(&self, filter: &Document) -> Result<DeleteResult> {
        let mut filter = Filter::parse(filter)?;
        let matches = {
            let state = self.state.read().await;
            state.bind_text(&mut filter)?;
            self.matching(&state, &filter, None)
        };

        let mut deleted_count = 0_usize;
        for (record, seen) in matches {
            let mut state = self.state.write().await;
            let still_matches = state
                .records
                .get(&record)
                .is_some_and(|current| Arc::ptr_eq(current, &seen) || filter.matches(current));
            if still_matches && self.commit_delete(&mut state, record).await? {
                deleted_count = deleted_count.saturating_add(1);
            }
        }
        debug!("Deleted {} documents from '{}'", deleted_count, self.name);
        Ok(DeleteResult {
            deleted_count,
        })
    }

    /// Looks up a document by `_id`.
    pub async fn get(&self, id: &Value) -> Option<Document> {
        let state = self.state.read().await;
        state
            .ids
            .get(id)
            .and_then(|record| state.records.get(record))
            .map(|document| document.as_ref().clone())
    }
}
