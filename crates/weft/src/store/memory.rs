//! Volatile in-process store backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use weft_protocol::items::{Attachment, Page, SortOrder, ThreadItem, ThreadMetadata};

use super::{StoreError, ThreadStore, page_slice};

#[derive(Default)]
struct MemoryInner {
    threads: HashMap<String, ThreadMetadata>,
    items: HashMap<String, Vec<ThreadItem>>,
    attachments: HashMap<String, Attachment>,
    attachment_files: HashMap<String, PathBuf>,
}

/// In-memory [`ThreadStore`]. All state dies with the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_items(items: &[ThreadItem], order: SortOrder) -> Vec<ThreadItem> {
    let mut items = items.to_vec();
    items.sort_by(|a, b| {
        (a.created_at(), a.id())
            .cmp(&(b.created_at(), b.id()))
    });
    if order == SortOrder::Desc {
        items.reverse();
    }
    items
}

#[async_trait]
impl ThreadStore for MemoryStore {
    async fn load_thread(&self, thread_id: &str) -> Result<ThreadMetadata, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(thread) = inner.threads.get(thread_id) {
            return Ok(thread.clone());
        }
        let thread = ThreadMetadata::new(thread_id);
        inner.threads.insert(thread_id.to_string(), thread.clone());
        inner.items.entry(thread_id.to_string()).or_default();
        Ok(thread)
    }

    async fn save_thread(&self, thread: &ThreadMetadata) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.threads.insert(thread.id.clone(), thread.clone());
        inner.items.entry(thread.id.clone()).or_default();
        Ok(())
    }

    async fn load_thread_items(
        &self,
        thread_id: &str,
        after: Option<&str>,
        limit: usize,
        order: SortOrder,
    ) -> Result<Page<ThreadItem>, StoreError> {
        let inner = self.inner.read().await;
        let items = inner
            .items
            .get(thread_id)
            .map(|items| sorted_items(items, order))
            .unwrap_or_default();
        Ok(page_slice(items, after, limit, |item| item.id()))
    }

    async fn add_thread_item(&self, thread_id: &str, item: &ThreadItem) -> Result<(), StoreError> {
        self.save_item(thread_id, item).await
    }

    async fn save_item(&self, thread_id: &str, item: &ThreadItem) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let items = inner.items.entry(thread_id.to_string()).or_default();
        match items.iter_mut().find(|existing| existing.id() == item.id()) {
            Some(existing) => *existing = item.clone(),
            None => items.push(item.clone()),
        }
        Ok(())
    }

    async fn load_item(&self, thread_id: &str, item_id: &str) -> Result<ThreadItem, StoreError> {
        let inner = self.inner.read().await;
        inner
            .items
            .get(thread_id)
            .and_then(|items| items.iter().find(|item| item.id() == item_id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("item {item_id}")))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.threads.remove(thread_id);
        inner.items.remove(thread_id);
        Ok(())
    }

    async fn delete_thread_item(
        &self,
        thread_id: &str,
        item_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(items) = inner.items.get_mut(thread_id) {
            items.retain(|item| item.id() != item_id);
        }
        Ok(())
    }

    async fn load_threads(
        &self,
        after: Option<&str>,
        limit: usize,
        order: SortOrder,
    ) -> Result<Page<ThreadMetadata>, StoreError> {
        let inner = self.inner.read().await;
        let mut threads: Vec<ThreadMetadata> = inner.threads.values().cloned().collect();
        threads.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        if order == SortOrder::Desc {
            threads.reverse();
        }
        Ok(page_slice(threads, after, limit, |thread| thread.id.as_str()))
    }

    async fn save_attachment(&self, attachment: &Attachment) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .attachments
            .insert(attachment.id.clone(), attachment.clone());
        Ok(())
    }

    async fn load_attachment(&self, attachment_id: &str) -> Result<Attachment, StoreError> {
        let inner = self.inner.read().await;
        inner
            .attachments
            .get(attachment_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("attachment {attachment_id}")))
    }

    async fn delete_attachment(&self, attachment_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.attachments.remove(attachment_id);
        inner.attachment_files.remove(attachment_id);
        Ok(())
    }

    async fn set_attachment_file(
        &self,
        attachment_id: &str,
        path: &Path,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .attachment_files
            .insert(attachment_id.to_string(), path.to_path_buf());
        Ok(())
    }

    async fn get_attachment_file(
        &self,
        attachment_id: &str,
    ) -> Result<Option<PathBuf>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.attachment_files.get(attachment_id).cloned())
    }
}
