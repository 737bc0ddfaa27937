//! Conversation storage.
//!
//! One contract, two backends: [`MemoryStore`] for volatile in-process use
//! and [`SqliteStore`] for durable single-file storage. Both expose the
//! identical externally observable semantics and are exercised by the same
//! contract test suite.

mod memory;
mod sqlite;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use weft_protocol::items::{Attachment, Page, SortOrder, ThreadItem, ThreadMetadata};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage contract for threads, their ordered item sequences, and
/// attachment records.
///
/// Ordering is always `(created_at, id)`. Pagination cursors are exclusive:
/// the page resumes strictly past the element whose id matches `after`,
/// located by scanning the ordered sequence; an unmatched cursor restarts
/// from the beginning.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Load a thread, creating and persisting it if absent. Never fails
    /// with not-found.
    async fn load_thread(&self, thread_id: &str) -> Result<ThreadMetadata, StoreError>;

    /// Idempotent upsert keyed by thread id.
    async fn save_thread(&self, thread: &ThreadMetadata) -> Result<(), StoreError>;

    async fn load_thread_items(
        &self,
        thread_id: &str,
        after: Option<&str>,
        limit: usize,
        order: SortOrder,
    ) -> Result<Page<ThreadItem>, StoreError>;

    /// Insert if absent, else behave as [`save_item`](Self::save_item) —
    /// at most one record per id per thread.
    async fn add_thread_item(&self, thread_id: &str, item: &ThreadItem) -> Result<(), StoreError>;

    /// Upsert by item id.
    async fn save_item(&self, thread_id: &str, item: &ThreadItem) -> Result<(), StoreError>;

    async fn load_item(&self, thread_id: &str, item_id: &str) -> Result<ThreadItem, StoreError>;

    /// Remove the thread and all of its items as one atomic unit.
    async fn delete_thread(&self, thread_id: &str) -> Result<(), StoreError>;

    /// Remove a single item; absent items are not an error.
    async fn delete_thread_item(&self, thread_id: &str, item_id: &str)
    -> Result<(), StoreError>;

    async fn load_threads(
        &self,
        after: Option<&str>,
        limit: usize,
        order: SortOrder,
    ) -> Result<Page<ThreadMetadata>, StoreError>;

    async fn save_attachment(&self, attachment: &Attachment) -> Result<(), StoreError>;

    async fn load_attachment(&self, attachment_id: &str) -> Result<Attachment, StoreError>;

    async fn delete_attachment(&self, attachment_id: &str) -> Result<(), StoreError>;

    /// Bind the attachment's blob location. Independent of the metadata
    /// record's lifecycle: may be set before or after the record is saved,
    /// and survives metadata upserts.
    async fn set_attachment_file(
        &self,
        attachment_id: &str,
        path: &Path,
    ) -> Result<(), StoreError>;

    async fn get_attachment_file(
        &self,
        attachment_id: &str,
    ) -> Result<Option<PathBuf>, StoreError>;
}

/// Slice an ordered sequence into one page.
///
/// The cursor is matched by scanning the order-respecting position; the
/// sequence is not re-sorted per page. `has_more` is true iff strictly more
/// elements exist beyond the returned slice.
pub(crate) fn page_slice<T, F>(items: Vec<T>, after: Option<&str>, limit: usize, id_of: F) -> Page<T>
where
    F: Fn(&T) -> &str,
{
    let start = after
        .and_then(|cursor| {
            items
                .iter()
                .position(|item| id_of(item) == cursor)
                .map(|idx| idx + 1)
        })
        .unwrap_or(0);
    let has_more = start + limit < items.len();
    let data: Vec<T> = items.into_iter().skip(start).take(limit).collect();
    let after = data.last().map(|item| id_of(item).to_string());
    Page {
        data,
        has_more,
        after,
    }
}
