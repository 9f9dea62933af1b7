//! HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          SFX Server                              │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────┐  │
//! │  │   HTTP Listener  │  │   Rate Limiter   │  │   Metrics    │  │
//! │  │   (axum)         │  │   (init only)    │  │              │  │
//! │  └────────┬─────────┘  └────────┬─────────┘  └──────┬───────┘  │
//! │           │                     │                    │          │
//! │           ▼                     ▼                    ▼          │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │                   Key Exchange                            │  │
//! │  │  • RAM-only session store                                │  │
//! │  │  • Single-use completion                                 │  │
//! │  │  • Background expiry sweep                               │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! │                              │ derived key                      │
//! │                              ▼                                  │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │        Channel Registry  ──►  File Exchange               │  │
//! │  │  • Per-session AEAD          • Sealed blobs on disk       │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod metrics;
mod rate_limit;
mod routes;

pub use config::{ServerConfig, ServerConfigFile};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use rate_limit::RateLimiter;
pub use routes::{router, ApiError};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::audit::{AuditSink, JsonLinesAuditSink, TracingAuditSink};
use crate::channel::ChannelRegistry;
use crate::crypto::DhGenerator;
use crate::error::Result;
use crate::exchange::{KeyExchange, SessionStore};
use crate::files::{DiskFileStore, FileExchange, FileStore};

/// Handles shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub exchange: Arc<KeyExchange>,
    pub audit: Arc<dyn AuditSink>,
    pub files: Arc<FileExchange>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<ServerMetrics>,
}

/// Main server instance.
pub struct Server {
    config: Arc<ServerConfig>,
    state: AppState,
    audit_log: Option<Arc<JsonLinesAuditSink>>,
}

impl Server {
    /// Create a server from validated configuration.
    ///
    /// Opens the upload directory and, when configured, the audit log.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let audit_log = match &config.audit_log {
            Some(path) => Some(Arc::new(JsonLinesAuditSink::open(path).await?)),
            None => None,
        };
        let audit: Arc<dyn AuditSink> = match &audit_log {
            Some(sink) => sink.clone(),
            None => Arc::new(TracingAuditSink),
        };
        let file_store = Arc::new(DiskFileStore::open(&config.upload_dir).await?);
        let generator = config.generator()?;

        let mut server = Self::with_components(config, generator, audit, file_store)?;
        server.audit_log = audit_log;
        Ok(server)
    }

    /// Assemble a server from explicit parts.
    pub fn with_components(
        config: ServerConfig,
        generator: DhGenerator,
        audit: Arc<dyn AuditSink>,
        file_store: Arc<dyn FileStore>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let channels = Arc::new(ChannelRegistry::new(config.channel_lifetime));
        let store = Arc::new(SessionStore::new(generator, config.store_config())?);

        let state = AppState {
            exchange: Arc::new(KeyExchange::new(
                store,
                Arc::clone(&channels),
                Arc::clone(&audit),
            )),
            files: Arc::new(FileExchange::new(
                file_store,
                channels,
                Arc::clone(&audit),
                config.max_upload_bytes,
            )),
            audit,
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_window,
            )),
            metrics: Arc::new(ServerMetrics::new()),
        };

        Ok(Self {
            config,
            state,
            audit_log: None,
        })
    }

    /// Router serving this server's state.
    pub fn router(&self) -> axum::Router {
        router(self.state.clone())
    }

    /// Start the server and run until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!(
            "SFX server listening on {} ({}-bit DH, session timeout {:?})",
            addr,
            self.config.modulus_bits,
            self.config.session_timeout
        );

        // Start background tasks
        let sweeper = self.spawn_sweeper();

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        sweeper.abort();
        if let Some(audit_log) = &self.audit_log {
            audit_log.flush().await;
        }
        tracing::info!("SFX server stopped");
        Ok(served?)
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let exchange = Arc::clone(&self.state.exchange);
        let metrics = Arc::clone(&self.state.metrics);
        let interval = self.config.sweep_interval;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let report = exchange.sweep();
                metrics.add_expired(report.expired_sessions as u64);
            }
        })
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get server metrics.
    pub fn metrics(&self) -> &ServerMetrics {
        &self.state.metrics
    }

    /// Pending key exchanges.
    pub fn session_count(&self) -> usize {
        self.state.exchange.store().count()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
