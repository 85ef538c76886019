use std::sync::Arc;

use tracing::{debug, trace};

use crate::{persistence::Change, validation::validate_collection_name, Collection, Result};
use super::stor::Store;

#[allow(clippy::multiple_inherent_impl, reason = "multiple impl blocks for Store are intentional for organization")]
impl Store {
    /// Returns the collection called `name`, opening it on first access.
    ///
    /// Opening replays whatever the persistence collaborator holds for the collection and
    /// rebuilds its indexes. Later calls return the same shared handle.
    ///
    /// # Errors
    ///
    /// - `CorvidError::InvalidCollectionName` if `name` is not a valid collection name
    /// - `CorvidError::Persistence` or `CorvidError::Io` if the journal cannot be replayed
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    ///
    /// use corvid_db::Store;
    ///
    /// # async fn example() -> corvid_db::Result<()> {
    /// let store = Store::new();
    /// let first = store.collection("students").await?;
    /// let second = store.collection("students").await?;
    /// assert!(Arc::ptr_eq(&first, &second));
    /// assert!(store.collection("bad name!").await.is_err());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        trace!("Accessing collection '{}'", name);
        if let Some(collection) = self.collections.read().await.get(name) {
            return Ok(Arc::clone(collection));
        }

        let mut collections = self.collections.write().await;
        if let Some(collection) = collections.get(name) {
            return Ok(Arc::clone(collection));
        }
        validate_collection_name(name)?;
        let collection = Arc::new(
            Collection::open(
                name,
                self.config.for_collection(name),
                Arc::clone(&self.persistence),
            )
            .await?,
        );
        collections.insert(name.to_owned(), Arc::clone(&collection));
        debug!("Collection '{}' ready", name);
        Ok(collection)
    }

    /// Drops a collection with its documents and indexes.
    ///
    /// Handles obtained earlier are emptied and reject further writes with
    /// `CorvidError::CollectionDropped`; [`Store::collection`] opens a fresh one.
    ///
    /// # Returns
    ///
    /// Returns whether the collection existed, in memory or in persistence.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::InvalidCollectionName` for an invalid name and persistence errors
    /// raised while recording the drop.
    pub async fn drop_collection(&self, name: &str) -> Result<bool> {
        trace!("Dropping collection '{}'", name);
        validate_collection_name(name)?;
        let mut collections = self.collections.write().await;
        let existed = collections.contains_key(name) ||
            self.persistence
                .collection_names()
                .await?
                .iter()
                .any(|known| known == name);
        if !existed {
            debug!("Collection '{}' does not exist, nothing to drop", name);
            return Ok(false);
        }

        self.persistence
            .persist(&Change::DropCollection {
                collection: name.to_owned(),
            })
            .await?;
        if let Some(collection) = collections.remove(name) {
            collection.clear().await;
        }
        debug!("Dropped collection '{}'", name);
        Ok(true)
    }

    /// Lists the names of every open or persisted collection, sorted.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::Io` if the persisted collections cannot be listed.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.extend(self.persistence.collection_names().await?);
        names.sort();
        names.dedup();
        trace!("Found {} collections", names.len());
        Ok(names)
    }
}
