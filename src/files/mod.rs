//! File exchange over established secure channels.
//!
//! Uploads are sealed under the uploading session's channel before they reach
//! the [`FileStore`]; downloads are opened through the caller's channel. The
//! session id is the associated data of every sealed blob.

mod store;

pub use store::{
    stored_name_for, validate_stored_name, DiskFileStore, FileInfo, FileStore, MemoryFileStore,
    StoredFile,
};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditEventType, AuditSink, RequestContext};
use crate::channel::ChannelRegistry;
use crate::error::{Error, Result};

/// Response to a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub filename: String,
    pub stored_filename: String,
    pub message: String,
}

/// File service shared by the request handlers.
pub struct FileExchange {
    store: Arc<dyn FileStore>,
    channels: Arc<ChannelRegistry>,
    audit: Arc<dyn AuditSink>,
    max_upload_bytes: usize,
}

impl FileExchange {
    pub fn new(
        store: Arc<dyn FileStore>,
        channels: Arc<ChannelRegistry>,
        audit: Arc<dyn AuditSink>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store,
            channels,
            audit,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Seal and store an uploaded file.
    pub async fn upload(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<UploadReceipt> {
        let result = self.try_upload(session_id, filename, bytes).await;

        let event = AuditEvent::new(AuditEventType::FileUpload, ctx, result.is_ok());
        self.audit.record(match &result {
            Ok(receipt) => event.with_details(format!(
                "{} stored as {} ({} bytes)",
                filename,
                receipt.stored_filename,
                bytes.len()
            )),
            Err(e) => event.with_details(format!("{}: {}", filename, e)),
        });
        result
    }

    async fn try_upload(
        &self,
        session_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<UploadReceipt> {
        if bytes.len() > self.max_upload_bytes {
            return Err(Error::PayloadTooLarge {
                limit: self.max_upload_bytes,
                actual: bytes.len(),
            });
        }

        let channel = self.channels.get(session_id)?;
        let sealed = channel.seal(bytes, session_id.as_bytes())?;
        let stored = self.store.put(filename, sealed).await?;

        tracing::debug!(stored_name = %stored.stored_name, "File stored");
        Ok(UploadReceipt {
            filename: filename.to_string(),
            stored_filename: stored.stored_name,
            message: "File uploaded successfully".to_string(),
        })
    }

    /// Fetch and open a stored file.
    pub async fn download(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        stored_name: &str,
    ) -> Result<Vec<u8>> {
        let result = self.try_download(session_id, stored_name).await;

        let event = AuditEvent::new(AuditEventType::FileDownload, ctx, result.is_ok());
        self.audit.record(match &result {
            Ok(bytes) => event.with_details(format!("{} ({} bytes)", stored_name, bytes.len())),
            Err(e) => event.with_details(format!("{}: {}", stored_name, e)),
        });
        result
    }

    async fn try_download(&self, session_id: &str, stored_name: &str) -> Result<Vec<u8>> {
        validate_stored_name(stored_name)?;
        let channel = self.channels.get(session_id)?;
        let sealed = self.store.get(stored_name).await?;
        channel.open(&sealed, session_id.as_bytes())
    }

    /// List stored files.
    pub async fn list(&self, ctx: &RequestContext) -> Result<Vec<FileInfo>> {
        let result = self.store.list().await;

        let event = AuditEvent::new(AuditEventType::FileList, ctx, result.is_ok());
        self.audit.record(match &result {
            Ok(files) => event.with_details(format!("{} files", files.len())),
            Err(e) => event.with_details(e.to_string()),
        });
        result
    }
}
