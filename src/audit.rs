//! Audit trail for key-exchange and file events.
//!
//! Every security-relevant outcome is recorded as an [`AuditEvent`] through
//! an [`AuditSink`]. Internal error text ends up here and never in a client
//! response.

use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;

/// Kind of audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    KeyExchangeInit,
    KeyExchangeCompleteSuccess,
    KeyExchangeCompleteFailure,
    KeyExchangeExpired,
    FileUpload,
    FileDownload,
    FileList,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::KeyExchangeInit => "key_exchange_init",
            AuditEventType::KeyExchangeCompleteSuccess => "key_exchange_complete_success",
            AuditEventType::KeyExchangeCompleteFailure => "key_exchange_complete_failure",
            AuditEventType::KeyExchangeExpired => "key_exchange_expired",
            AuditEventType::FileUpload => "file_upload",
            AuditEventType::FileDownload => "file_download",
            AuditEventType::FileList => "file_list",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who made a request. Both fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub ip_address: Option<IpAddr>,
}

impl RequestContext {
    /// Context with nothing known about the caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_ip(mut self, ip_address: IpAddr) -> Self {
        self.ip_address = Some(ip_address);
        self
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub user_id: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub success: bool,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// New event stamped with the current time.
    pub fn new(event_type: AuditEventType, ctx: &RequestContext, success: bool) -> Self {
        Self {
            event_type,
            user_id: ctx.user_id.clone(),
            ip_address: ctx.ip_address,
            success,
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Destination for audit events.
///
/// Recording never fails from the caller's point of view; sinks report their
/// own I/O problems through `tracing`.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits each event as a `tracing` event on target `audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let user_id = event.user_id.as_deref().unwrap_or("-");
        let ip = event
            .ip_address
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".to_string());
        let details = event.details.as_deref().unwrap_or("");

        if event.success {
            tracing::info!(
                target: "audit",
                event_type = %event.event_type,
                user_id,
                ip = %ip,
                details,
                "audit"
            );
        } else {
            tracing::warn!(
                target: "audit",
                event_type = %event.event_type,
                user_id,
                ip = %ip,
                details,
                "audit"
            );
        }
    }
}

enum AuditLine {
    Event(String),
    Flush(oneshot::Sender<()>),
}

/// Appends one JSON object per line to a file.
///
/// `record` only queues the line; a background task owns the file, so
/// request handlers never wait on disk I/O.
pub struct JsonLinesAuditSink {
    lines: mpsc::UnboundedSender<AuditLine>,
}

impl JsonLinesAuditSink {
    /// Open `path` for appending, creating it if needed, and start the
    /// writer task. Must be called inside a Tokio runtime.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;

        let (lines, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(BufWriter::new(file), queue));
        Ok(Self { lines })
    }

    /// Wait until every event recorded so far has reached the file.
    pub async fn flush(&self) {
        let (done, flushed) = oneshot::channel();
        if self.lines.send(AuditLine::Flush(done)).is_ok() {
            let _ = flushed.await;
        }
    }
}

async fn write_lines(mut writer: BufWriter<File>, mut queue: mpsc::UnboundedReceiver<AuditLine>) {
    while let Some(line) = queue.recv().await {
        match line {
            AuditLine::Event(mut text) => {
                text.push('\n');
                if let Err(e) = writer.write_all(text.as_bytes()).await {
                    tracing::error!("Failed to write audit event: {}", e);
                    continue;
                }
                // Batch whatever queued up meanwhile into one flush
                if queue.is_empty() {
                    if let Err(e) = writer.flush().await {
                        tracing::error!("Failed to flush audit log: {}", e);
                    }
                }
            }
            AuditLine::Flush(done) => {
                if let Err(e) = writer.flush().await {
                    tracing::error!("Failed to flush audit log: {}", e);
                }
                let _ = done.send(());
            }
        }
    }
    let _ = writer.flush().await;
}

impl AuditSink for JsonLinesAuditSink {
    fn record(&self, event: AuditEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        if self.lines.send(AuditLine::Event(line)).is_err() {
            tracing::error!("Audit writer stopped; event dropped");
        }
    }
}

impl std::fmt::Debug for JsonLinesAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesAuditSink").finish_non_exhaustive()
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Events of one type.
    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
