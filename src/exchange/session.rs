//! A single key-exchange session.
//!
//! Public material (parameters, server public value, timestamps) is
//! immutable after creation. The mutable part, the state and the key pair,
//! sits behind a per-session mutex so completions on one id are serialized.

use std::time::Duration;

use num_bigint_dig::BigUint;
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::crypto::encoding;
use crate::crypto::{DhParameters, KeyPair};
use crate::error::Result;
use crate::exchange::ExchangeState;

/// Opaque, URL-safe session identifier.
pub type SessionId = String;

/// Mutable half of a session.
pub(crate) struct SessionSecrets {
    pub(crate) state: ExchangeState,
    /// Present only while `AwaitingPeer`
    pub(crate) keypair: Option<KeyPair>,
}

impl SessionSecrets {
    /// Move to a terminal state and wipe the key pair.
    pub(crate) fn terminate(&mut self, next: ExchangeState) -> Result<()> {
        self.state.advance(next)?;
        // Dropping the key pair zeroizes the private exponent
        self.keypair = None;
        Ok(())
    }
}

/// A key exchange in progress.
pub struct ExchangeSession {
    id: SessionId,
    parameters: DhParameters,
    public_key: BigUint,
    created_at: Instant,
    secrets: Mutex<SessionSecrets>,
}

impl ExchangeSession {
    pub(crate) fn new(id: SessionId, parameters: DhParameters, keypair: KeyPair) -> Self {
        Self {
            id,
            public_key: keypair.public().clone(),
            parameters,
            created_at: Instant::now(),
            secrets: Mutex::new(SessionSecrets {
                state: ExchangeState::AwaitingPeer,
                keypair: Some(keypair),
            }),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parameters issued for this session.
    pub fn parameters(&self) -> &DhParameters {
        &self.parameters
    }

    /// This side's public value.
    pub fn public_key(&self) -> &BigUint {
        &self.public_key
    }

    /// Creation time.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Current state.
    pub fn state(&self) -> ExchangeState {
        self.secrets.lock().state
    }

    /// Age has reached `timeout`.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.created_at.elapsed() >= timeout
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionSecrets> {
        self.secrets.lock()
    }

    /// Snapshot of the public fields.
    pub fn info(&self) -> SessionInfo {
        self.info_with_state(self.state())
    }

    pub(crate) fn info_with_state(&self, state: ExchangeState) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            state,
            parameters: self.parameters.clone(),
            public_key: self.public_key.clone(),
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for ExchangeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("modulus_bits", &self.parameters.bits())
            .finish_non_exhaustive()
    }
}

/// Public view of a session. Carries no secret material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: ExchangeState,
    pub parameters: DhParameters,
    pub public_key: BigUint,
    pub created_at: Instant,
}

impl SessionInfo {
    /// Parameters as PKCS#3 PEM.
    pub fn parameters_pem(&self) -> Result<String> {
        encoding::parameters_to_pem(&self.parameters)
    }

    /// Public value as SubjectPublicKeyInfo PEM.
    pub fn public_key_pem(&self) -> Result<String> {
        encoding::public_key_to_pem(&self.parameters, &self.public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DhGenerator;
    use crate::error::Error;

    fn session() -> ExchangeSession {
        let (params, keypair) = DhGenerator::insecure_for_tests(128).generate().unwrap();
        ExchangeSession::new("sid".into(), params, keypair)
    }

    #[tokio::test]
    async fn test_new_session_awaits_peer() {
        let session = session();
        assert_eq!(session.state(), ExchangeState::AwaitingPeer);
        assert!(session.lock().keypair.is_some());
        assert_eq!(session.info().id, "sid");
    }

    #[tokio::test]
    async fn test_terminate_wipes_keypair() {
        let session = session();
        {
            let mut secrets = session.lock();
            secrets.terminate(ExchangeState::Failed).unwrap();
            assert!(secrets.keypair.is_none());
        }
        assert_eq!(session.state(), ExchangeState::Failed);

        let err = session.lock().terminate(ExchangeState::Completed).unwrap_err();
        assert!(matches!(err, Error::AlreadyCompleted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_boundary_is_inclusive() {
        let session = session();
        let timeout = Duration::from_secs(300);

        tokio::time::advance(timeout - Duration::from_millis(1)).await;
        assert!(!session.is_expired(timeout));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(session.is_expired(timeout));
    }

    #[tokio::test]
    async fn test_info_pem_material() {
        let info = session().info();
        assert!(info.parameters_pem().unwrap().contains("DH PARAMETERS"));
        assert!(info.public_key_pem().unwrap().contains("PUBLIC KEY"));
    }

    #[tokio::test]
    async fn test_debug_has_no_secrets() {
        let rendered = format!("{:?}", session());
        assert!(rendered.contains("AwaitingPeer"));
        assert!(!rendered.contains("keypair"));
    }
}
