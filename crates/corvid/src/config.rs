//! Store and collection configuration.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, Value};

/// How `_id`s are generated for documents inserted without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Collision-resistant random string ids (`cuid2`)
    #[default]
    Cuid2,
    /// Time-ordered 24-character hex ids: milliseconds since the epoch followed by a
    /// process-wide counter
    ObjectId,
}

static OBJECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

impl IdStrategy {
    /// Generates a fresh `_id` value.
    pub fn generate(self) -> Value {
        match self {
            Self::Cuid2 => Value::String(cuid2::create_id()),
            Self::ObjectId => {
                let millis = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
                let counter = OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
                Value::String(format!(
                    "{:012x}{:012x}",
                    millis & 0xFFFF_FFFF_FFFF,
                    counter & 0xFFFF_FFFF_FFFF
                ))
            },
        }
    }
}

/// Per-collection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Id generation for documents inserted without `_id`
    pub id_strategy:         IdStrategy,
    /// Default for `BulkOptions::ordered` when the CLI runs a bulk request
    pub ordered_bulk:        bool,
    /// Collection size above which a query that no index can answer is logged with `warn!`
    pub scan_warn_threshold: Option<usize>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            id_strategy:         IdStrategy::Cuid2,
            ordered_bulk:        false,
            scan_warn_threshold: Some(10_000),
        }
    }
}

/// Store-wide settings with per-collection overrides.
///
/// # Example
///
/// ```rust
/// use corvid_db::config::{IdStrategy, StoreConfig};
///
/// let config: StoreConfig = serde_json::from_str(
///     r#"{"collections": {"events": {"id_strategy": "object_id"}}}"#,
/// )
/// .unwrap();
/// assert_eq!(config.for_collection("events").id_strategy, IdStrategy::ObjectId);
/// assert_eq!(config.for_collection("students").id_strategy, IdStrategy::Cuid2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for the JSON-lines journal; `None` keeps everything in memory
    pub data_dir:            Option<PathBuf>,
    /// Settings for collections without an override
    pub collection_defaults: CollectionConfig,
    /// Collection-specific settings (replace the defaults entirely)
    pub collections:         HashMap<String, CollectionConfig>,
}

impl StoreConfig {
    /// An in-memory configuration journaling to `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    /// The effective settings for `collection`.
    pub fn for_collection(&self, collection: &str) -> CollectionConfig {
        self.collections
            .get(collection)
            .cloned()
            .unwrap_or_else(|| self.collection_defaults.clone())
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `CorvidError::Io` if the file cannot be read and `CorvidError::Json` if it is not a
    /// valid configuration.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: Self = serde_json::from_str(&content)?;
        debug!("Loaded store configuration from {:?}", path.as_ref());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_id_strategies_generate_distinct_strings() {
        let a = IdStrategy::Cuid2.generate();
        let b = IdStrategy::Cuid2.generate();
        assert_ne!(a, b);

        let first = IdStrategy::ObjectId.generate();
        let second = IdStrategy::ObjectId.generate();
        let (Value::String(first), Value::String(second)) = (first, second)
        else {
            panic!("object ids are strings");
        };
        assert_eq!(first.len(), 24);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(first < second);
    }

    #[test]
    fn test_defaults_and_overrides() {
        let config = StoreConfig::default();
        assert!(config.data_dir.is_none());
        assert_eq!(config.for_collection("students"), CollectionConfig::default());

        let mut config = StoreConfig::with_data_dir("/tmp/corvid");
        config.collections.insert(
            "audit".to_owned(),
            CollectionConfig {
                ordered_bulk: true,
                ..CollectionConfig::default()
            },
        );
        assert!(config.for_collection("audit").ordered_bulk);
        assert!(!config.for_collection("students").ordered_bulk);
    }

    #[tokio::test]
    async fn test_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corvid.json");
        tokio::fs::write(
            &path,
            r#"{"data_dir": "/var/lib/corvid", "collection_defaults": {"scan_warn_threshold": null}}"#,
        )
        .await
        .unwrap();
        let config = StoreConfig::from_file(&path).await.unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/corvid")));
        assert_eq!(config.collection_defaults.scan_warn_threshold, None);
        assert_eq!(config.collection_defaults.id_strategy, IdStrategy::Cuid2);

        assert!(StoreConfig::from_file(dir.path().join("missing.json")).await.is_err());
    }
}
