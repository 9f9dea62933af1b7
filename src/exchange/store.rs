//! RAM-only session store.
//!
//! Sessions live exclusively in memory and are retired on completion,
//! failure or expiry. Retired ids leave a short-lived tombstone so a replayed
//! completion reports `AlreadyCompleted` or `Expired` precisely. Once the
//! tombstone is pruned, the id still verifies against the store's id key and
//! keeps answering `AlreadyCompleted`. Explicitly evicted ids answer
//! `NotFound` for the life of the store.
//!
//! Lock order: a session's own mutex, then the session map, then the
//! tombstone map, then the eviction set. The session mutex is never taken
//! while a map lock is held.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::crypto::{derive_session_key, AeadKey, DhGenerator, DhParameters, KeyPair, PeerPublicKey};
use crate::error::{Error, Result};
use crate::exchange::id::SessionIdIssuer;
use crate::exchange::{ExchangeSession, ExchangeState, SessionId, SessionInfo};

/// Limits applied by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Sessions at least this old are expired
    pub session_timeout: Duration,
    /// How long a retired id is remembered
    pub tombstone_retention: Duration,
    /// Upper bound on live sessions
    pub max_sessions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            session_timeout: crate::DEFAULT_SESSION_TIMEOUT,
            tombstone_retention: crate::DEFAULT_TOMBSTONE_RETENTION,
            max_sessions: crate::DEFAULT_MAX_SESSIONS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    state: ExchangeState,
    retired_at: Instant,
}

/// Ids moved to a terminal state by one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Sessions that timed out while awaiting a peer
    pub expired: Vec<SessionId>,
    /// Tombstones dropped after their retention period
    pub pruned_tombstones: usize,
}

/// Owns every live exchange session.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<ExchangeSession>>>,
    tombstones: Mutex<HashMap<SessionId, Tombstone>>,
    evicted: Mutex<HashSet<SessionId>>,
    ids: SessionIdIssuer,
    generator: DhGenerator,
    config: StoreConfig,
}

impl SessionStore {
    /// Create an empty store with a fresh id key.
    pub fn new(generator: DhGenerator, config: StoreConfig) -> Result<Self> {
        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            tombstones: Mutex::new(HashMap::new()),
            evicted: Mutex::new(HashSet::new()),
            ids: SessionIdIssuer::new()?,
            generator,
            config,
        })
    }

    /// Store limits.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Create a session with fresh parameters.
    ///
    /// Generation runs on the blocking pool with no store lock held. If this
    /// future is dropped before generation finishes, nothing is inserted.
    pub async fn create(&self) -> Result<SessionInfo> {
        self.ensure_capacity()?;

        let generator = self.generator;
        let (params, keypair) = tokio::task::spawn_blocking(move || generator.generate())
            .await
            .map_err(|e| Error::generation(format!("generation task failed: {}", e)))??;

        self.insert(params, keypair)
    }

    /// Blocking variant of [`SessionStore::create`] for callers outside a runtime.
    pub fn create_blocking(&self) -> Result<SessionInfo> {
        self.ensure_capacity()?;
        let (params, keypair) = self.generator.generate()?;
        self.insert(params, keypair)
    }

    /// Whether `max_sessions` live sessions exist.
    ///
    /// Overdue sessions still count until a sweep or lookup retires them.
    pub fn is_full(&self) -> bool {
        self.sessions.read().len() >= self.config.max_sessions
    }

    fn ensure_capacity(&self) -> Result<()> {
        if self.is_full() {
            return Err(Error::Capacity(self.config.max_sessions));
        }
        Ok(())
    }

    fn insert(&self, params: DhParameters, keypair: KeyPair) -> Result<SessionInfo> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.config.max_sessions {
            return Err(Error::Capacity(self.config.max_sessions));
        }

        let id = loop {
            let candidate = self.ids.issue()?;
            if !sessions.contains_key(&candidate)
                && !self.tombstones.lock().contains_key(&candidate)
            {
                break candidate;
            }
        };

        let session = Arc::new(ExchangeSession::new(id.clone(), params, keypair));
        let info = session.info_with_state(ExchangeState::AwaitingPeer);
        sessions.insert(id, session);

        tracing::debug!(session_id = %info.id, "Key exchange session created");
        Ok(info)
    }

    fn lookup(&self, id: &str) -> Option<Arc<ExchangeSession>> {
        self.sessions.read().get(id).cloned()
    }

    /// Public view of a live session.
    ///
    /// A session found past its timeout is expired on the spot and reported
    /// as [`Error::Expired`]; it is never returned as `AwaitingPeer`.
    pub fn get(&self, id: &str) -> Result<SessionInfo> {
        let session = self.lookup(id).ok_or(Error::NotFound)?;
        let mut secrets = session.lock();

        if secrets.state == ExchangeState::AwaitingPeer
            && session.is_expired(self.config.session_timeout)
        {
            secrets.terminate(ExchangeState::Expired)?;
            self.retire(id, ExchangeState::Expired);
            return Err(Error::Expired);
        }

        Ok(session.info_with_state(secrets.state))
    }

    /// Consume the peer's public key and derive the session key.
    ///
    /// The key is handed out exactly once. Every later call on the same id
    /// fails, including calls racing this one.
    pub fn complete(&self, id: &str, peer: &PeerPublicKey) -> Result<AeadKey> {
        let session = match self.lookup(id) {
            Some(session) => session,
            None => return Err(self.retired_error(id)),
        };

        let mut secrets = session.lock();
        if let Some(err) = secrets.state.completion_error() {
            return Err(err);
        }

        if session.is_expired(self.config.session_timeout) {
            secrets.terminate(ExchangeState::Expired)?;
            self.retire(id, ExchangeState::Expired);
            return Err(Error::Expired);
        }

        let keypair = secrets.keypair.take().ok_or(Error::AlreadyCompleted)?;
        let outcome = if peer.parameters != *session.parameters() {
            Err(Error::invalid_peer_key("parameters do not match session"))
        } else {
            keypair
                .compute_shared(session.parameters(), &peer.value)
                .and_then(|shared| derive_session_key(&shared, id))
        };
        drop(keypair);

        let next = match outcome {
            Ok(_) => ExchangeState::Completed,
            Err(_) => ExchangeState::Failed,
        };
        secrets.terminate(next)?;
        self.retire(id, next);

        match &outcome {
            Ok(_) => tracing::debug!(session_id = %id, "Key exchange completed"),
            Err(e) => tracing::debug!(session_id = %id, error = %e, "Key exchange failed"),
        }
        outcome
    }

    /// Remove a session and wipe its secrets.
    ///
    /// The id reads as unknown from then on. Returns whether a live session
    /// was removed.
    pub fn evict(&self, id: &str) -> bool {
        let Some(session) = self.lookup(id) else {
            return false;
        };

        let mut secrets = session.lock();
        if secrets.state == ExchangeState::AwaitingPeer {
            let _ = secrets.terminate(ExchangeState::Failed);
        }
        secrets.keypair = None;

        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            self.evicted.lock().insert(id.to_string());
            tracing::debug!(session_id = %id, "Key exchange session evicted");
        }
        removed
    }

    /// Expire every overdue `AwaitingPeer` session and prune old tombstones.
    pub fn sweep(&self) -> SweepOutcome {
        let candidates: Vec<Arc<ExchangeSession>> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_expired(self.config.session_timeout))
            .cloned()
            .collect();

        let mut expired = Vec::new();
        for session in candidates {
            let mut secrets = session.lock();
            if secrets.terminate(ExchangeState::Expired).is_ok()
                && self.retire(session.id(), ExchangeState::Expired)
            {
                expired.push(session.id().to_string());
            }
        }

        let retention = self.config.tombstone_retention;
        let pruned_tombstones = {
            let mut tombstones = self.tombstones.lock();
            let before = tombstones.len();
            tombstones.retain(|_, t| t.retired_at.elapsed() < retention);
            before - tombstones.len()
        };

        if !expired.is_empty() {
            tracing::debug!("Expired {} key exchange sessions", expired.len());
        }

        SweepOutcome {
            expired,
            pruned_tombstones,
        }
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Number of remembered retired ids.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.lock().len()
    }

    /// Move a session from the live map to the tombstones.
    fn retire(&self, id: &str, state: ExchangeState) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            self.tombstones.lock().insert(
                id.to_string(),
                Tombstone {
                    state,
                    retired_at: Instant::now(),
                },
            );
        }
        removed
    }

    /// Why `id`, absent from the live map, cannot be completed.
    fn retired_error(&self, id: &str) -> Error {
        if let Some(t) = self.tombstones.lock().get(id) {
            if let Some(err) = t.state.completion_error() {
                return err;
            }
        }
        if self.evicted.lock().contains(id) {
            return Error::NotFound;
        }
        if self.ids.recognises(id) {
            // Issued here and no longer live: retired, tombstone pruned
            return Error::AlreadyCompleted;
        }
        Error::NotFound
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.count())
            .field("tombstones", &self.tombstone_count())
            .field("config", &self.config)
            .finish()
    }
}
