use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::{
    constants::ID_INDEX_NAME,
    index::{IndexOptions, IndexSpec, QueryDelegate},
    persistence::Change,
    CorvidError,
    Document,
    Result,
};
use super::coll::Collection;

#[allow(clippy::multiple_inherent_impl, reason = "multiple impl blocks for Collection are intentional for organization")]
impl Collection {
    /// Creates an index over the existing documents and maintains it on every later write.
    ///
    /// # Arguments
    ///
    /// * `keys` - Ordered key document: `{"major": 1, "gpa": -1}`, or `{"bio": "text"}`
    /// * `options` - Optional name and uniqueness
    ///
    /// # Returns
    ///
    /// Returns the index name. Creating an identical index again is a no-op.
    ///
    /// # Errors
    ///
    /// - `CorvidError::InvalidArgument` for invalid keys or a conflicting name
    /// - `CorvidError::DuplicateKey` if a unique index cannot be built over existing documents
    ///
    /// # Example
    ///
    /// ```rust
    /// use corvid_db::{Document, IndexOptions, Store};
    /// use serde_json::json;
    ///
    /// # async fn example() -> corvid_db::Result<()> {
    /// let store = Store::new();
    /// let students = store.collection("students").await?;
    /// let name = students
    ///     .create_index(
    ///         &Document::from_json(json!({"student_id": 1}))?,
    ///         IndexOptions {
    ///             unique: true,
    ///             ..IndexOptions::default()
    ///         },
    ///     )
    ///     .await?;
    /// assert_eq!(name, "student_id_1");
    /// assert_eq!(students.get_indexes().await.len(), 2);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_index(&self, keys: &Document, options: IndexOptions) -> Result<String> {
        let spec = IndexSpec::parse(keys, options)?;
        let name = spec.name.clone();
        trace!("Creating index '{}' on '{}'", name, self.name);

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        self.ensure_live(state)?;
        let documents = state
            .records
            .iter()
            .map(|(&record, document)| (record, document.as_ref()));
        let created = state.indexes.create(spec.clone(), documents)?;
        if !created {
            debug!("Index '{}' already exists on '{}'", name, self.name);
            return Ok(name);
        }

        let persisted = self
            .persistence
            .persist(&Change::CreateIndex {
                collection: self.name.clone(),
                spec,
            })
            .await;
        if let Err(e) = persisted {
            if state.indexes.drop_index(&name).is_err() {
                warn!("Could not roll back index '{}' on '{}'", name, self.name);
            }
            return Err(e);
        }
        debug!("Created index '{}' on '{}'", name, self.name);
        Ok(name)
    }

    /// Drops an index by name.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidArgument` for `_id_` or an unknown name.
    pub async fn drop_index(&self, name: &str) -> Result<()> {
        trace!("Dropping index '{}' on '{}'", name, self.name);
        if name == ID_INDEX_NAME {
            return Err(CorvidError::invalid("dropIndex", "the _id_ index cannot be dropped"));
        }
        let mut state = self.state.write().await;
        self.ensure_live(&state)?;
        if !state.indexes.specs().iter().any(|spec| spec.name == name) {
            return Err(CorvidError::invalid(
                "dropIndex",
                format!("index '{}' not found", name),
            ));
        }
        self.persistence
            .persist(&Change::DropIndex {
                collection: self.name.clone(),
                name:       name.to_owned(),
            })
            .await?;
        state.indexes.drop_index(name)?;
        debug!("Dropped index '{}' on '{}'", name, self.name);
        Ok(())
    }

    /// Describes every index as `{key, name, unique}`, the implicit `_id_` index first.
    pub async fn get_indexes(&self) -> Vec<Document> {
        let state = self.state.read().await;
        state
            .indexes
            .specs()
            .iter()
            .map(IndexSpec::to_document)
            .collect()
    }

    /// Installs (or removes, with `None`) an external candidate supplier consulted before the
    /// in-memory indexes.
    pub async fn set_query_delegate(&self, delegate: Option<Arc<dyn QueryDelegate>>) {
        self.state.write().await.indexes.set_delegate(delegate);
    }
}
