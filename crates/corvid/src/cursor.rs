//! Restartable result cursors over query snapshots.

use std::{pin::Pin, sync::Arc};

use tokio_stream::Stream;

use crate::{Document, Projection};

/// A lazy, restartable sequence of query results.
///
/// The cursor owns an immutable snapshot of the matching document versions, already sorted
/// and cut by skip/limit. Later writes to the collection are never observed. Projection runs
/// per item as the cursor advances.
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
/// students.insert_one(Document::from_json(json!({"name": "Alice"}))?).await?;
///
/// let mut cursor = students.find(&Document::new(), FindOptions::new()).await?;
/// let first: Vec<Document> = cursor.by_ref().collect();
/// cursor.rewind();
/// let second: Vec<Document> = cursor.collect();
/// assert_eq!(first, second);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Cursor {
    documents:  Arc<[Arc<Document>]>,
    projection: Projection,
    position:   usize,
}

impl Cursor {
    pub(crate) fn new(documents: Vec<Arc<Document>>, projection: Projection) -> Self {
        Self {
            documents: documents.into(),
            projection,
            position: 0,
        }
    }

    /// Total number of results in the snapshot.
    pub fn len(&self) -> usize { self.documents.len() }

    pub fn is_empty(&self) -> bool { self.documents.is_empty() }

    /// Number of results not yet consumed.
    pub fn remaining(&self) -> usize { self.documents.len().saturating_sub(self.position) }

    /// Restarts iteration from the first result.
    pub const fn rewind(&mut self) { self.position = 0; }

    /// Converts the cursor into a stream of the remaining results.
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = Document> + Send>> { Box::pin(tokio_stream::iter(self)) }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        let document = self.documents.get(self.position)?;
        self.position += 1;
        Some(self.projection.apply(document))
    }

    fn size_hint(&self) -> (usize, Option<usize>) { (self.remaining(), Some(self.remaining())) }
}

impl ExactSizeIterator for Cursor {}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_stream::StreamExt as _;

    use super::*;

    fn snapshot() -> Vec<Arc<Document>> {
        (1 ..= 3)
            .map(|n| Arc::new(Document::from_json(json!({"_id": n, "n": n, "secret": "x"})).unwrap()))
            .collect()
    }

    #[test]
    fn test_cursor_iterates_and_rewinds() {
        let mut cursor = Cursor::new(snapshot(), Projection::default());
        assert_eq!(cursor.len(), 3);
        assert_eq!(cursor.next().map(|d| d.to_json()["n"].clone()), Some(json!(1)));
        assert_eq!(cursor.remaining(), 2);
        let rest: Vec<_> = cursor.by_ref().collect();
        assert_eq!(rest.len(), 2);
        assert!(cursor.next().is_none());
        cursor.rewind();
        assert_eq!(cursor.count(), 3);
    }

    #[test]
    fn test_cursor_projects_lazily() {
        let projection = Projection::parse(&Document::from_json(json!({"secret": 0})).unwrap()).unwrap();
        let cursor = Cursor::new(snapshot(), projection);
        for doc in cursor {
            assert!(!doc.contains_key("secret"));
            assert!(doc.contains_key("_id"));
        }
    }

    #[tokio::test]
    async fn test_cursor_into_stream() {
        let cursor = Cursor::new(snapshot(), Projection::default());
        let docs: Vec<Document> = cursor.into_stream().collect().await;
        assert_eq!(docs.len(), 3);
    }
}
