//! Key-exchange service: the layer between transport and store.
//!
//! Decodes wire material, drives the [`SessionStore`], hands derived keys to
//! the [`ChannelRegistry`] and records the audit trail.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditEventType, AuditSink, RequestContext};
use crate::channel::ChannelRegistry;
use crate::crypto::encoding;
use crate::error::Result;
use crate::exchange::{SessionInfo, SessionStore};

/// Body returned by `init`. Both PEM documents are base64-wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResponse {
    pub session_id: String,
    pub public_key: String,
    pub parameters: String,
}

impl InitResponse {
    /// Encode a freshly created session.
    pub fn from_session(info: &SessionInfo) -> Result<Self> {
        Ok(Self {
            session_id: info.id.clone(),
            public_key: encoding::wrap_base64(&info.public_key_pem()?),
            parameters: encoding::wrap_base64(&info.parameters_pem()?),
        })
    }
}

/// Body accepted by `complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub session_id: String,
    /// Base64-wrapped SubjectPublicKeyInfo PEM
    pub public_key: String,
}

/// What one maintenance pass retired.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_sessions: usize,
    pub expired_channels: usize,
}

/// Key-exchange facade shared by every request handler.
pub struct KeyExchange {
    store: Arc<SessionStore>,
    channels: Arc<ChannelRegistry>,
    audit: Arc<dyn AuditSink>,
}

impl KeyExchange {
    pub fn new(
        store: Arc<SessionStore>,
        channels: Arc<ChannelRegistry>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            channels,
            audit,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Sweep when the store is full, so overdue sessions stop holding
    /// capacity. Expiries found this way are audited like any other sweep.
    pub fn reclaim_capacity(&self) -> Option<SweepReport> {
        if self.store.is_full() {
            Some(self.sweep())
        } else {
            None
        }
    }

    /// Start a new exchange.
    pub async fn init(&self, ctx: &RequestContext) -> Result<InitResponse> {
        self.reclaim_capacity();

        let result = match self.store.create().await {
            Ok(info) => InitResponse::from_session(&info),
            Err(e) => Err(e),
        };

        let event = AuditEvent::new(AuditEventType::KeyExchangeInit, ctx, result.is_ok());
        let event = match &result {
            Ok(response) => event.with_details(format!("session {}", response.session_id)),
            Err(e) => event.with_details(e.to_string()),
        };
        self.audit.record(event);

        if let Err(e) = &result {
            tracing::error!("Key exchange init failed: {}", e);
        }
        result
    }

    /// Finish an exchange with the peer's public key.
    ///
    /// Malformed encodings are rejected before the session is touched. On
    /// success the derived key goes to the channel registry and nothing
    /// secret is returned.
    ///
    /// CPU-bound; async callers should run it on a blocking thread.
    pub fn complete(&self, ctx: &RequestContext, request: &CompleteRequest) -> Result<()> {
        let result = self.try_complete(request);

        let event = match &result {
            Ok(()) => AuditEvent::new(AuditEventType::KeyExchangeCompleteSuccess, ctx, true)
                .with_details(format!("session {}", request.session_id)),
            Err(e) => AuditEvent::new(AuditEventType::KeyExchangeCompleteFailure, ctx, false)
                .with_details(format!(
                    "session {}: {} ({})",
                    request.session_id,
                    e,
                    e.category()
                )),
        };
        self.audit.record(event);
        result
    }

    fn try_complete(&self, request: &CompleteRequest) -> Result<()> {
        let pem = encoding::unwrap_base64(&request.public_key)?;
        let peer = encoding::public_key_from_pem(&pem)?;

        let key = self.store.complete(&request.session_id, &peer)?;
        self.channels.establish(&request.session_id, key);
        Ok(())
    }

    /// Expire overdue sessions and channels, auditing each expired session.
    pub fn sweep(&self) -> SweepReport {
        let outcome = self.store.sweep();
        let expired_channels = self.channels.sweep();

        let ctx = RequestContext::anonymous();
        for id in &outcome.expired {
            self.audit.record(
                AuditEvent::new(AuditEventType::KeyExchangeExpired, &ctx, true)
                    .with_details(format!("session {}", id)),
            );
        }

        SweepReport {
            expired_sessions: outcome.expired.len(),
            expired_channels,
        }
    }
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchange")
            .field("store", &self.store)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::audit::MemoryAuditSink;
    use crate::crypto::DhGenerator;
    use crate::error::Error;
    use crate::exchange::{PeerExchange, StoreConfig};

    fn service_with(config: StoreConfig) -> (KeyExchange, Arc<MemoryAuditSink>) {
        let audit = Arc::new(MemoryAuditSink::new());
        let service = KeyExchange::new(
            Arc::new(SessionStore::new(DhGenerator::insecure_for_tests(256), config).unwrap()),
            Arc::new(ChannelRegistry::new(Duration::from_secs(3600))),
            audit.clone(),
        );
        (service, audit)
    }

    fn service() -> (KeyExchange, Arc<MemoryAuditSink>) {
        service_with(StoreConfig::default())
    }

    #[tokio::test]
    async fn test_init_complete_scenario() {
        let (service, audit) = service();
        let ctx = RequestContext::anonymous().with_user("alice");

        let init = service.init(&ctx).await.unwrap();
        assert!(!init.session_id.is_empty());

        let peer = PeerExchange::respond(&init).unwrap();
        service.complete(&ctx, &peer.complete_request().unwrap()).unwrap();

        // The channel is live and speaks the peer's key
        let client_key = peer.derive_key().unwrap();
        let sealed = crate::crypto::Aead::new(&client_key).seal(b"doc", b"").unwrap();
        let channel = service.channels().get(&init.session_id).unwrap();
        assert_eq!(channel.open(&sealed, b"").unwrap(), b"doc");

        // Replay is refused
        let err = service.complete(&ctx, &peer.complete_request().unwrap()).unwrap_err();
        assert!(matches!(err, Error::AlreadyCompleted));

        // Unknown id
        let bogus = CompleteRequest {
            session_id: "does-not-exist".into(),
            public_key: peer.complete_request().unwrap().public_key,
        };
        assert!(matches!(service.complete(&ctx, &bogus), Err(Error::NotFound)));

        assert_eq!(audit.of_type(AuditEventType::KeyExchangeInit).len(), 1);
        assert_eq!(audit.of_type(AuditEventType::KeyExchangeCompleteSuccess).len(), 1);
        assert_eq!(audit.of_type(AuditEventType::KeyExchangeCompleteFailure).len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_key_leaves_session_usable() {
        let (service, audit) = service();
        let ctx = RequestContext::anonymous();
        let init = service.init(&ctx).await.unwrap();

        let garbage = CompleteRequest {
            session_id: init.session_id.clone(),
            public_key: "!!not base64!!".into(),
        };
        assert!(matches!(service.complete(&ctx, &garbage), Err(Error::Encoding(_))));

        let not_pem = CompleteRequest {
            session_id: init.session_id.clone(),
            public_key: encoding::wrap_base64("hello"),
        };
        assert!(matches!(service.complete(&ctx, &not_pem), Err(Error::Encoding(_))));

        let peer = PeerExchange::respond(&init).unwrap();
        assert!(service.complete(&ctx, &peer.complete_request().unwrap()).is_ok());

        let failures = audit.of_type(AuditEventType::KeyExchangeCompleteFailure);
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|e| !e.success && e.details.is_some()));
    }

    #[tokio::test]
    async fn test_failure_audit_has_no_key_material() {
        let (service, audit) = service();
        let ctx = RequestContext::anonymous();
        let a = service.init(&ctx).await.unwrap();
        let b = service.init(&ctx).await.unwrap();

        // Peer key built for b's parameters submitted against a
        let peer = PeerExchange::respond(&b).unwrap();
        let mut request = peer.complete_request().unwrap();
        request.session_id = a.session_id.clone();
        assert!(matches!(service.complete(&ctx, &request), Err(Error::InvalidPeerKey(_))));

        let event = &audit.of_type(AuditEventType::KeyExchangeCompleteFailure)[0];
        let details = event.details.as_deref().unwrap();
        assert!(details.contains(&a.session_id));
        assert!(!details.contains(&request.public_key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_audits_expired_sessions() {
        let (service, audit) = service_with(StoreConfig {
            session_timeout: Duration::from_secs(5),
            ..StoreConfig::default()
        });
        service.store().create_blocking().unwrap();
        service.store().create_blocking().unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        let report = service.sweep();

        assert_eq!(report.expired_sessions, 2);
        assert_eq!(report.expired_channels, 0);
        assert_eq!(audit.of_type(AuditEventType::KeyExchangeExpired).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_store_expiry_is_audited() {
        let (service, audit) = service_with(StoreConfig {
            session_timeout: Duration::from_secs(5),
            tombstone_retention: Duration::from_secs(60),
            max_sessions: 2,
        });
        let ctx = RequestContext::anonymous();
        let stale = service.init(&ctx).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        service.init(&ctx).await.unwrap();
        assert!(service.reclaim_capacity().is_some_and(|r| r.expired_sessions == 0));

        // Only the first session is overdue; init makes room by retiring it
        tokio::time::advance(Duration::from_secs(2)).await;
        service.init(&ctx).await.unwrap();

        let expired = audit.of_type(AuditEventType::KeyExchangeExpired);
        assert_eq!(expired.len(), 1);
        assert!(expired[0].details.as_deref().unwrap().contains(&stale.session_id));
        assert_eq!(service.store().count(), 2);

        // Nothing overdue: the store stays full
        assert!(matches!(service.init(&ctx).await, Err(Error::Capacity(2))));
        assert!(service.reclaim_capacity().is_some_and(|r| r.expired_sessions == 0));
        assert_eq!(audit.of_type(AuditEventType::KeyExchangeExpired).len(), 1);
    }
}
