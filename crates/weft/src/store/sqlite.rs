//! Durable SQLite store backend.
//!
//! Every record is stored as an opaque JSON snapshot (`payload_json`) plus
//! the indexed scalars needed for ordering and filtering. The pool holds a
//! single connection, so all storage I/O is serialized and runs off the
//! request-handling path; each public call commits on its own, except
//! `delete_thread` which is one transaction.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use weft_protocol::items::{Attachment, Page, SortOrder, ThreadItem, ThreadMetadata};

use super::{StoreError, ThreadStore, page_slice};

pub struct SqliteStore {
    pool: SqlitePool,
    /// Blob-path bindings observed by this process. Lets a binding exist
    /// before its metadata row does (two-phase upload handshake).
    attachment_files: DashMap<String, PathBuf>,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            attachment_files: DashMap::new(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                payload_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                type TEXT NOT NULL,
                payload_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_thread ON items(thread_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attachments (
                id TEXT PRIMARY KEY,
                payload_json TEXT NOT NULL,
                file_path TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ThreadStore for SqliteStore {
    async fn load_thread(&self, thread_id: &str) -> Result<ThreadMetadata, StoreError> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload_json FROM threads WHERE id = ?")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(payload) = payload {
            return Ok(serde_json::from_str(&payload)?);
        }

        let thread = ThreadMetadata::new(thread_id);
        self.save_thread(&thread).await?;
        Ok(thread)
    }

    async fn save_thread(&self, thread: &ThreadMetadata) -> Result<(), StoreError> {
        let payload = serde_json::to_string(thread)?;
        sqlx::query(
            r#"
            INSERT INTO threads (id, created_at, payload_json)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                created_at = excluded.created_at,
                payload_json = excluded.payload_json
            "#,
        )
        .bind(&thread.id)
        .bind(thread.created_at.to_rfc3339())
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_thread_items(
        &self,
        thread_id: &str,
        after: Option<&str>,
        limit: usize,
        order: SortOrder,
    ) -> Result<Page<ThreadItem>, StoreError> {
        let sql = format!(
            "SELECT payload_json FROM items WHERE thread_id = ? \
             ORDER BY created_at {dir}, id {dir}",
            dir = order.sql()
        );
        let rows = sqlx::query(&sql)
            .bind(thread_id)
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.get("payload_json");
            items.push(serde_json::from_str(&payload)?);
        }
        Ok(page_slice(items, after, limit, |item: &ThreadItem| item.id()))
    }

    async fn add_thread_item(&self, thread_id: &str, item: &ThreadItem) -> Result<(), StoreError> {
        self.save_item(thread_id, item).await
    }

    async fn save_item(&self, thread_id: &str, item: &ThreadItem) -> Result<(), StoreError> {
        let payload = serde_json::to_string(item)?;
        sqlx::query(
            r#"
            INSERT INTO items (id, thread_id, created_at, type, payload_json)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                thread_id = excluded.thread_id,
                created_at = excluded.created_at,
                type = excluded.type,
                payload_json = excluded.payload_json
            "#,
        )
        .bind(item.id())
        .bind(thread_id)
        .bind(item.created_at().to_rfc3339())
        .bind(item.type_name())
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_item(&self, thread_id: &str, item_id: &str) -> Result<ThreadItem, StoreError> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload_json FROM items WHERE id = ? AND thread_id = ?")
                .bind(item_id)
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await?;

        match payload {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Err(StoreError::NotFound(format!("item {item_id}"))),
        }
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM items WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM threads WHERE id = ?")
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_thread_item(
        &self,
        thread_id: &str,
        item_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM items WHERE id = ? AND thread_id = ?")
            .bind(item_id)
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_threads(
        &self,
        after: Option<&str>,
        limit: usize,
        order: SortOrder,
    ) -> Result<Page<ThreadMetadata>, StoreError> {
        let sql = format!(
            "SELECT payload_json FROM threads ORDER BY created_at {dir}, id {dir}",
            dir = order.sql()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut threads = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.get("payload_json");
            threads.push(serde_json::from_str(&payload)?);
        }
        Ok(page_slice(threads, after, limit, |thread: &ThreadMetadata| {
            thread.id.as_str()
        }))
    }

    async fn save_attachment(&self, attachment: &Attachment) -> Result<(), StoreError> {
        let payload = serde_json::to_string(attachment)?;
        // file_path is deliberately left alone on conflict: the binding has
        // its own lifecycle.
        sqlx::query(
            r#"
            INSERT INTO attachments (id, payload_json)
            VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET
                payload_json = excluded.payload_json
            "#,
        )
        .bind(&attachment.id)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_attachment(&self, attachment_id: &str) -> Result<Attachment, StoreError> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload_json FROM attachments WHERE id = ?")
                .bind(attachment_id)
                .fetch_optional(&self.pool)
                .await?;

        match payload {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Err(StoreError::NotFound(format!(
                "attachment {attachment_id}"
            ))),
        }
    }

    async fn delete_attachment(&self, attachment_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM attachments WHERE id = ?")
            .bind(attachment_id)
            .execute(&self.pool)
            .await?;
        self.attachment_files.remove(attachment_id);
        Ok(())
    }

    async fn set_attachment_file(
        &self,
        attachment_id: &str,
        path: &Path,
    ) -> Result<(), StoreError> {
        self.attachment_files
            .insert(attachment_id.to_string(), path.to_path_buf());
        sqlx::query("UPDATE attachments SET file_path = ? WHERE id = ?")
            .bind(path.to_string_lossy().into_owned())
            .bind(attachment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_attachment_file(
        &self,
        attachment_id: &str,
    ) -> Result<Option<PathBuf>, StoreError> {
        if let Some(cached) = self.attachment_files.get(attachment_id) {
            return Ok(Some(cached.clone()));
        }

        let file_path: Option<Option<String>> =
            sqlx::query_scalar("SELECT file_path FROM attachments WHERE id = ?")
                .bind(attachment_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(Some(file_path)) = file_path else {
            return Ok(None);
        };
        let path = PathBuf::from(file_path);
        self.attachment_files
            .insert(attachment_id.to_string(), path.clone());
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reopen_preserves_records_and_binding() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("weft.db");
        let blob = dir.path().join("file_a.txt");
        std::fs::write(&blob, b"blob").unwrap();

        {
            let store = SqliteStore::open(&db_path).await.unwrap();
            store.load_thread("t1").await.unwrap();
            store
                .save_attachment(&Attachment {
                    id: "file_a".to_string(),
                    name: "a.txt".to_string(),
                    mime_type: "text/plain".to_string(),
                    kind: weft_protocol::items::AttachmentKind::File,
                    preview_url: None,
                    upload_url: None,
                })
                .await
                .unwrap();
            store.set_attachment_file("file_a", &blob).await.unwrap();
        }

        let store = SqliteStore::open(&db_path).await.unwrap();
        let thread = store.load_thread("t1").await.unwrap();
        assert_eq!(thread.id, "t1");
        // Binding round-trips through the file_path column, not the cache.
        assert_eq!(
            store.get_attachment_file("file_a").await.unwrap(),
            Some(blob)
        );
    }
}
