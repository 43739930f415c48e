pub mod backend;
pub mod layered;
pub mod models;
pub mod probe;
pub mod sqlite_store;

pub use backend::{KeyValueStore, MemoryStore};
pub use layered::{LayeredStore, LoadOutcome, StoreStatus};
pub use models::{MessageUpdate, RawMessage, RawReply};
pub use sqlite_store::SqliteStore;

use std::fs;
use std::path::Path;

/// Ensure the directory holding `db_path` exists
pub fn ensure_data_dir(db_path: &str) -> std::io::Result<()> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
