use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::{
    config::CollectionConfig,
    constants::ID_INDEX_NAME,
    index::{Candidates, IndexManager, RecordId},
    persistence::{Change, Persistence},
    validation::validate_collection_name,
    CorvidError,
    Document,
    Filter,
    Result,
    Value,
};

/// A named set of documents with its indexes.
///
/// Every stored document is an immutable version behind an `Arc`. Writes swap in new
/// versions under the collection's write lock; reads take the read lock only long enough to
/// collect the versions they need, so results never observe later writes.
///
/// Collections are obtained from a [`Store`](crate::Store) and shared as `Arc<Collection>`.
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
///
/// students
///     .insert_one(Document::from_json(json!({"name": "Alice Johnson", "gpa": 3.8}))?)
///     .await?;
/// students
///     .insert_one(Document::from_json(json!({"name": "Bob Smith", "gpa": 3.2}))?)
///     .await?;
///
/// let honors = Document::from_json(json!({"gpa": {"$gte": 3.5}}))?;
/// assert_eq!(students.count(&honors).await?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
#[allow(
    clippy::field_scoped_visibility_modifiers,
    reason = "fields need to be pub(crate) for internal access"
)]
pub struct Collection {
    /// The collection name.
    pub(crate) name:        String,
    /// Effective settings for this collection.
    pub(crate) config:      CollectionConfig,
    /// Receives every committed change before it becomes visible.
    pub(crate) persistence: Arc<dyn Persistence>,
    /// Documents, the `_id` map and indexes.
    pub(crate) state:       RwLock<CollectionState>,
}

/// The mutable state of a collection, guarded by its lock.
#[derive(Debug)]
#[allow(
    clippy::field_scoped_visibility_modifiers,
    reason = "fields need to be pub(crate) for internal access"
)]
pub(crate) struct CollectionState {
    /// Next record id to assign; record ids define natural order.
    pub(crate) next_record: RecordId,
    /// Current version of every document.
    pub(crate) records:     BTreeMap<RecordId, Arc<Document>>,
    /// `_id` to record.
    pub(crate) ids:         BTreeMap<Value, RecordId>,
    /// Secondary indexes.
    pub(crate) indexes:     IndexManager,
    /// Set when the store drops the collection; later writes fail.
    pub(crate) dropped:     bool,
}

impl CollectionState {
    fn new(collection: &str) -> Self {
        Self {
            next_record: 0,
            records:     BTreeMap::new(),
            ids:         BTreeMap::new(),
            indexes:     IndexManager::new(collection),
            dropped:     false,
        }
    }

    fn allocate_record(&mut self) -> RecordId {
        let record = self.next_record;
        self.next_record = self.next_record.saturating_add(1);
        record
    }

    /// Binds `$text` clauses to the text index fields.
    pub(crate) fn bind_text(&self, filter: &mut Filter) -> Result<()> {
        if !filter.has_text() {
            return Ok(());
        }
        let fields = self
            .indexes
            .text_fields()
            .ok_or_else(|| CorvidError::invalid("$text", "a text index is required for $text queries"))?;
        filter.bind_text_fields(&fields);
        Ok(())
    }

    /// Every document version in natural order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Document>> { self.records.values().cloned().collect() }
}

impl Collection {
    /// Opens a collection, replaying whatever `persistence` holds for it.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidCollectionName` for an invalid name,
    /// `CorvidError::Persistence` if the recovered state is inconsistent (a document without
    /// `_id`, or a duplicated `_id`), and any error raised while rebuilding indexes.
    pub(crate) async fn open(name: &str, config: CollectionConfig, persistence: Arc<dyn Persistence>) -> Result<Self> {
        trace!("Opening collection '{}'", name);
        validate_collection_name(name)?;
        let loaded = persistence.load_all(name).await?;

        let mut state = CollectionState::new(name);
        for document in loaded.documents {
            let id = document.id().cloned().ok_or_else(|| {
                CorvidError::Persistence {
                    reason: format!("recovered a document without _id in '{}'", name),
                }
            })?;
            if state.ids.contains_key(&id) {
                return Err(CorvidError::Persistence {
                    reason: format!("recovered duplicate _id {} in '{}'", id, name),
                });
            }
            let record = state.allocate_record();
            state.ids.insert(id, record);
            state.records.insert(record, Arc::new(document));
        }
        for spec in loaded.indexes {
            let documents = state
                .records
                .iter()
                .map(|(&record, document)| (record, document.as_ref()));
            state.indexes.create(spec, documents)?;
        }
        debug!(
            "Collection '{}' opened with {} documents",
            name,
            state.records.len()
        );

        Ok(Self {
            name: name.to_owned(),
            config,
            persistence,
            state: RwLock::new(state),
        })
    }

    /// Returns the name of the collection.
    pub fn name(&self) -> &str { &self.name }

    /// Returns the effective configuration of the collection.
    pub const fn config(&self) -> &CollectionConfig { &self.config }

    /// Returns the number of documents currently stored.
    pub async fn document_count(&self) -> usize { self.state.read().await.records.len() }

    /// Collects the documents matching `filter`, in natural order, up to `limit`.
    ///
    /// Index candidates narrow the scan; the filter is always re-evaluated on each candidate.
    pub(crate) fn matching(
        &self,
        state: &CollectionState,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Vec<(RecordId, Arc<Document>)> {
        let records: Box<dyn Iterator<Item = RecordId> + '_> = match state.indexes.candidates(filter, &state.ids) {
            Candidates::Exact(set) => {
                trace!("Scanning {} index candidates in '{}'", set.len(), self.name);
                Box::new(set.into_iter())
            },
            Candidates::Unknown => {
                if let Some(threshold) = self.config.scan_warn_threshold &&
                    state.records.len() > threshold &&
                    !filter.conjuncts().is_empty()
                {
                    warn!(
                        "Unindexed scan of {} documents in '{}'",
                        state.records.len(),
                        self.name
                    );
                }
                Box::new(state.records.keys().copied())
            },
        };
        records
            .filter_map(|record| state.records.get(&record).map(|document| (record, document)))
            .filter(|&(_, document)| filter.matches(document))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(record, document)| (record, Arc::clone(document)))
            .collect()
    }

    /// Validates a new document: assigns `_id` if missing and checks every uniqueness
    /// constraint. Nothing is modified.
    pub(crate) fn prepare_insert(&self, state: &CollectionState, mut document: Document) -> Result<Document> {
        if let Some(key) = document.keys().find(|key| key.starts_with('$')) {
            return Err(CorvidError::invalid(
                "insert",
                format!("top-level field names cannot start with '$': '{}'", key),
            ));
        }
        match document.id() {
            None => document.set_id_first(self.config.id_strategy.generate()),
            Some(&Value::Array(_)) => return Err(CorvidError::invalid("insert", "_id cannot be an array")),
            Some(_) => {},
        }
        if let Some(id) = document.id() &&
            state.ids.contains_key(id)
        {
            return Err(CorvidError::DuplicateKey {
                collection: self.name.clone(),
                index:      ID_INDEX_NAME.to_owned(),
                key:        id.to_string(),
            });
        }
        state
            .indexes
            .check_unique(state.next_record, &document)?;
        Ok(document)
    }

    /// Fails with `CorvidError::CollectionDropped` once the store has dropped this collection.
    pub(crate) fn ensure_live(&self, state: &CollectionState) -> Result<()> {
        if state.dropped {
            warn!("Rejected write to dropped collection '{}'", self.name);
            return Err(CorvidError::CollectionDropped {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Persists and publishes a prepared document, returning its `_id`.
    pub(crate) async fn commit_insert(&self, state: &mut CollectionState, document: Document) -> Result<Value> {
        self.ensure_live(state)?;
        let id = document
            .id()
            .cloned()
            .ok_or_else(|| CorvidError::invalid("insert", "document has no _id"))?;
        self.persistence
            .persist(&Change::Insert {
                collection: self.name.clone(),
                document:   document.clone(),
            })
            .await?;
        let record = state.allocate_record();
        state.indexes.insert(record, &document);
        state.ids.insert(id.clone(), record);
        state.records.insert(record, Arc::new(document));
        trace!("Inserted {} into '{}' as record {}", id, self.name, record);
        Ok(id)
    }

    /// Persists and publishes a new version of `record`. The `_id` must be unchanged.
    pub(crate) async fn commit_replace(
        &self,
        state: &mut CollectionState,
        record: RecordId,
        document: Document,
    ) -> Result<()> {
        self.ensure_live(state)?;
        let previous = state
            .records
            .get(&record)
            .cloned()
            .ok_or_else(|| CorvidError::invalid("update", "the document no longer exists"))?;
        self.persistence
            .persist(&Change::Replace {
                collection: self.name.clone(),
                document:   document.clone(),
            })
            .await?;
        state.indexes.remove(record, &previous);
        state.indexes.insert(record, &document);
        state.records.insert(record, Arc::new(document));
        Ok(())
    }

    /// Persists and applies the removal of `record`. A missing record is a no-op.
    pub(crate) async fn commit_delete(&self, state: &mut CollectionState, record: RecordId) -> Result<bool> {
        self.ensure_live(state)?;
        let Some(previous) = state.records.get(&record).cloned()
        else {
            return Ok(false);
        };
        let id = previous.id().cloned().unwrap_or_default();
        self.persistence
            .persist(&Change::Delete {
                collection: self.name.clone(),
                id:         id.clone(),
            })
            .await?;
        state.records.remove(&record);
        state.ids.remove(&id);
        state.indexes.remove(record, &previous);
        Ok(true)
    }

    /// Removes every document and index, without touching persistence, and refuses later
    /// writes.
    pub(crate) async fn clear(&self) {
        let mut state = self.state.write().await;
        *state = CollectionState::new(&self.name);
        state.dropped = true;
    }
}
