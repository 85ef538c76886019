//! The persistence collaborator: a change log consulted when collections open and fed every
//! committed mutation.
//!
//! The engine itself is in-memory. A [`Persistence`] implementation sees each change before it
//! becomes visible and can replay a collection when the store reopens it.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncWriteExt as _, BufWriter},
    sync::Mutex,
};
use tracing::{debug, trace, warn};

use crate::{constants::JOURNAL_EXTENSION, index::IndexSpec, CorvidError, Document, Result, Value};

/// A committed mutation of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// A new document was inserted.
    Insert {
        collection: String,
        document:   Document,
    },
    /// The document with the same `_id` was replaced by a new version.
    Replace {
        collection: String,
        document:   Document,
    },
    /// The document with this `_id` was deleted.
    Delete {
        collection: String,
        id:         Value,
    },
    CreateIndex {
        collection: String,
        spec:       IndexSpec,
    },
    DropIndex {
        collection: String,
        name:       String,
    },
    /// The whole collection was dropped.
    DropCollection {
        collection: String,
    },
}

impl Change {
    /// The collection the change applies to.
    pub fn collection(&self) -> &str {
        match *self {
            Self::Insert {
                ref collection,
                ..
            } |
            Self::Replace {
                ref collection,
                ..
            } |
            Self::Delete {
                ref collection,
                ..
            } |
            Self::CreateIndex {
                ref collection,
                ..
            } |
            Self::DropIndex {
                ref collection,
                ..
            } |
            Self::DropCollection {
                ref collection,
            } => collection,
        }
    }
}

/// Documents (in natural order) and index declarations recovered for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedCollection {
    pub documents: Vec<Document>,
    pub indexes:   Vec<IndexSpec>,
}

/// Folds a sequence of changes into the collection state they describe.
#[derive(Debug, Default)]
struct Replay {
    slots:     Vec<Option<Document>>,
    positions: BTreeMap<Value, usize>,
    indexes:   Vec<IndexSpec>,
}

impl Replay {
    fn apply(&mut self, change: Change) {
        match change {
            Change::Insert {
                document,
                ..
            } => {
                if let Some(id) = document.id().cloned() {
                    self.positions.insert(id, self.slots.len());
                }
                self.slots.push(Some(document));
            },
            Change::Replace {
                document,
                ..
            } => {
                let position = document.id().and_then(|id| self.positions.get(id)).copied();
                match position.and_then(|position| self.slots.get_mut(position)) {
                    Some(slot) => *slot = Some(document),
                    None => warn!("Journal replaces an unknown document, ignoring"),
                }
            },
            Change::Delete {
                id,
                ..
            } => {
                if let Some(position) = self.positions.remove(&id) &&
                    let Some(slot) = self.slots.get_mut(position)
                {
                    *slot = None;
                }
            },
            Change::CreateIndex {
                spec,
                ..
            } => {
                self.indexes.retain(|existing| existing.name != spec.name);
                self.indexes.push(spec);
            },
            Change::DropIndex {
                name,
                ..
            } => self.indexes.retain(|existing| existing.name != name),
            Change::DropCollection {
                ..
            } => *self = Self::default(),
        }
    }

    fn finish(self) -> LoadedCollection {
        LoadedCollection {
            documents: self.slots.into_iter().flatten().collect(),
            indexes:   self.indexes,
        }
    }
}

/// Durable storage for collection changes.
///
/// `persist` is called under the collection's write lock before the change becomes visible; an
/// error aborts the mutation.
#[async_trait]
pub trait Persistence: Send + Sync + fmt::Debug {
    /// Recovers the state of `collection`. Unknown collections load empty.
    async fn load_all(&self, collection: &str) -> Result<LoadedCollection>;

    /// Records one committed change.
    async fn persist(&self, change: &Change) -> Result<()>;

    /// Names of the collections that have persisted state.
    async fn collection_names(&self) -> Result<Vec<String>>;
}

/// Persistence that keeps nothing. The default for in-memory stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersistence;

#[async_trait]
impl Persistence for NoopPersistence {
    async fn load_all(&self, _collection: &str) -> Result<LoadedCollection> { Ok(LoadedCollection::default()) }

    async fn persist(&self, _change: &Change) -> Result<()> { Ok(()) }

    async fn collection_names(&self) -> Result<Vec<String>> { Ok(Vec::new()) }
}

/// An append-only JSON-lines journal, one file per collection under a data directory.
///
/// Each line is one [`Change`]. Loading a collection replays its file from the start; lines that
/// fail to parse are skipped with a warning.
///
/// # Example
///
/// ```rust,no_run
/// use corvid_db::persistence::{Change, JsonlJournal, Persistence};
/// use corvid_db::Document;
/// use serde_json::json;
///
/// # async fn example() -> corvid_db::Result<()> {
/// let journal = JsonlJournal::open("/tmp/corvid-data").await?;
/// journal
///     .persist(&Change::Insert {
///         collection: "students".to_owned(),
///         document:   Document::from_json(json!({"_id": 1, "name": "Alice"}))?,
///     })
///     .await?;
/// let loaded = journal.load_all("students").await?;
/// assert_eq!(loaded.documents.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct JsonlJournal {
    data_dir: PathBuf,
    writers:  Mutex<HashMap<String, BufWriter<File>>>,
}

impl JsonlJournal {
    /// Opens (creating if needed) a journal directory.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::Io` if the directory cannot be created.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&data_dir).await?;
        debug!("Opened journal directory {:?}", data_dir);
        Ok(Self {
            data_dir,
            writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path { &self.data_dir }

    fn journal_path(&self, collection: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}", collection, JOURNAL_EXTENSION))
    }
}

#[async_trait]
impl Persistence for JsonlJournal {
    async fn load_all(&self, collection: &str) -> Result<LoadedCollection> {
        let path = self.journal_path(collection);
        if !tokio::fs::try_exists(&path).await? {
            trace!("No journal for collection '{}'", collection);
            return Ok(LoadedCollection::default());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let mut replay = Replay::default();
        let mut applied = 0_usize;
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Change>(line) {
                Ok(change) => {
                    replay.apply(change);
                    applied = applied.saturating_add(1);
                },
                Err(e) => warn!("Skipping invalid journal line {} of {:?}: {}", line_num.saturating_add(1), path, e),
            }
        }
        let loaded = replay.finish();
        debug!(
            "Replayed {} changes for '{}': {} documents, {} indexes",
            applied,
            collection,
            loaded.documents.len(),
            loaded.indexes.len()
        );
        Ok(loaded)
    }

    async fn persist(&self, change: &Change) -> Result<()> {
        let collection = change.collection();
        let path = self.journal_path(collection);
        let mut writers = self.writers.lock().await;

        if let Change::DropCollection {
            ..
        } = *change
        {
            writers.remove(collection);
            if tokio::fs::try_exists(&path).await? {
                tokio::fs::remove_file(&path).await?;
            }
            debug!("Removed journal for dropped collection '{}'", collection);
            return Ok(());
        }

        let mut line = serde_json::to_vec(change)?;
        line.push(b'\n');

        let writer = match writers.entry(collection.to_owned()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .map_err(|e| {
                        CorvidError::Persistence {
                            reason: format!("cannot open journal {:?}: {}", path, e),
                        }
                    })?;
                entry.insert(BufWriter::new(file))
            },
        };
        writer.write_all(&line).await?;
        writer.flush().await?;
        trace!("Journaled change for '{}'", collection);
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(JOURNAL_EXTENSION) &&
                let Some(stem) = path.file_stem().and_then(|stem| stem.to_str())
            {
                names.push(stem.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
