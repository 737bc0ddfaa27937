//! Attachment lifecycle.
//!
//! Attachments are two-phase: the metadata record can exist before the
//! bytes do (handshake upload), and the blob binding is tracked separately
//! from the record. Deletion cascades from record to blob, tolerating an
//! already-missing file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use weft_protocol::items::{
    Attachment, attachment_kind_for, generate_attachment_id,
};

use crate::error::ServerError;
use crate::store::ThreadStore;

pub struct AttachmentService {
    store: Arc<dyn ThreadStore>,
    upload_dir: PathBuf,
    public_base_url: String,
}

impl AttachmentService {
    pub fn new(store: Arc<dyn ThreadStore>, upload_dir: PathBuf, public_base_url: String) -> Self {
        Self {
            store,
            upload_dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    fn file_url(&self, attachment_id: &str) -> String {
        format!("{}/files/{attachment_id}", self.public_base_url)
    }

    /// Where the blob for this attachment lives, keeping the original
    /// file extension.
    pub fn blob_path(&self, attachment_id: &str, original_name: &str) -> PathBuf {
        let extension = Path::new(original_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        self.upload_dir.join(format!("{attachment_id}{extension}"))
    }

    /// Handshake phase one: create the metadata record before any bytes
    /// exist. The returned `upload_url` is where the client PUTs the blob.
    pub async fn create_attachment(
        &self,
        name: &str,
        mime_type: &str,
    ) -> Result<Attachment, ServerError> {
        let id = generate_attachment_id(mime_type);
        let url = self.file_url(&id);
        let kind = attachment_kind_for(mime_type);
        let attachment = Attachment {
            id,
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            kind,
            preview_url: mime_type.starts_with("image/").then(|| url.clone()),
            upload_url: Some(url),
        };
        self.store.save_attachment(&attachment).await?;
        Ok(attachment)
    }

    /// Direct upload: bytes are already on disk; save metadata and bind the
    /// blob in one go. No `upload_url` is ever exposed on this path.
    pub async fn finish_direct_upload(
        &self,
        attachment_id: &str,
        name: &str,
        mime_type: &str,
        path: &Path,
    ) -> Result<Attachment, ServerError> {
        let attachment = Attachment {
            id: attachment_id.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            kind: attachment_kind_for(mime_type),
            preview_url: mime_type
                .starts_with("image/")
                .then(|| self.file_url(attachment_id)),
            upload_url: None,
        };
        self.store.save_attachment(&attachment).await?;
        self.store.set_attachment_file(attachment_id, path).await?;
        Ok(attachment)
    }

    /// Handshake phase two: bytes arrived for a pre-created record. Binds
    /// the blob and clears the now-spent `upload_url`.
    pub async fn finish_handshake_upload(
        &self,
        attachment_id: &str,
        path: &Path,
    ) -> Result<(), ServerError> {
        let mut attachment = self.store.load_attachment(attachment_id).await?;
        self.store.set_attachment_file(attachment_id, path).await?;
        if attachment.upload_url.take().is_some() {
            self.store.save_attachment(&attachment).await?;
        }
        Ok(())
    }

    /// Remove the blob and then the record. A missing file is tolerated;
    /// any other unlink failure is logged and the record still goes away.
    pub async fn delete_attachment(&self, attachment_id: &str) -> Result<(), ServerError> {
        if let Some(path) = self.store.get_attachment_file(attachment_id).await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(attachment_id, error = %err, "failed to unlink attachment blob");
                }
            }
        }
        self.store.delete_attachment(attachment_id).await?;
        Ok(())
    }
}
