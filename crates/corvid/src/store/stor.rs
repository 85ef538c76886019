use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::{
    config::StoreConfig,
    persistence::{JsonlJournal, NoopPersistence, Persistence},
    Collection,
    Result,
};

/// The entry point of the engine: a set of named collections sharing one configuration and one
/// persistence collaborator.
///
/// Collections are created on first access. With a `data_dir` configured, every committed
/// change is appended to a JSON-lines journal per collection and replayed when the collection
/// is next opened; without one, everything stays in memory.
///
/// # Examples
///
/// ```rust
/// use corvid_db::{Document, Store};
/// use serde_json::json;
///
/// # async fn example() -> corvid_db::Result<()> {
/// let store = Store::new();
/// let students = store.collection("students").await?;
/// students
///     .insert_one(Document::from_json(json!({"name": "Alice Johnson"}))?)
///     .await?;
/// assert_eq!(store.list_collections().await?, ["students"]);
/// # Ok(())
/// # }
/// ```
///
/// # Thread Safety
///
/// `Store` is safe to share across tasks. Collections are handed out as `Arc<Collection>` and
/// manage their own locking.
#[allow(
    clippy::field_scoped_visibility_modifiers,
    reason = "fields need to be pub(crate) for internal access"
)]
#[derive(Debug)]
pub struct Store {
    /// Store-wide settings.
    pub(crate) config:      StoreConfig,
    /// Receives every committed change of every collection.
    pub(crate) persistence: Arc<dyn Persistence>,
    /// Collections opened so far.
    pub(crate) collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Default for Store {
    fn default() -> Self { Self::new() }
}

impl Store {
    /// Creates an in-memory store with default settings.
    pub fn new() -> Self { Self::with_persistence(StoreConfig::default(), Arc::new(NoopPersistence)) }

    /// Creates a store from `config`, journaling to `config.data_dir` when it is set.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::Io` if the data directory cannot be created.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use corvid_db::{config::StoreConfig, Store};
    ///
    /// # async fn example() -> corvid_db::Result<()> {
    /// let store = Store::open(StoreConfig::with_data_dir("/var/lib/corvid")).await?;
    /// let students = store.collection("students").await?;
    /// println!("{} students recovered", students.document_count().await);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open(config: StoreConfig) -> Result<Self> {
        trace!("Opening store with data dir {:?}", config.data_dir);
        let persistence: Arc<dyn Persistence> = match config.data_dir {
            Some(ref data_dir) => Arc::new(JsonlJournal::open(data_dir).await?),
            None => Arc::new(NoopPersistence),
        };
        debug!("Store opened");
        Ok(Self::with_persistence(config, persistence))
    }

    /// Creates a store that feeds its changes to a custom persistence collaborator.
    ///
    /// `config.data_dir` is ignored.
    pub fn with_persistence(config: StoreConfig, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            config,
            persistence,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the store configuration.
    pub const fn config(&self) -> &StoreConfig { &self.config }
}
