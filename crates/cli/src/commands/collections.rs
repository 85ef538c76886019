use corvid_db::Store;
use serde_json::json;

use super::emit;

/// Print the names of every collection in the store.
pub async fn run(store: &Store) -> corvid_db::Result<()> {
    let names = store.list_collections().await?;
    emit([json!(names)]).await
}
