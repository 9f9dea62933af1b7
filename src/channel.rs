//! Secure channels keyed by completed exchange sessions.
//!
//! Completing a key exchange hands its derived key to the
//! [`ChannelRegistry`]. File payloads are then sealed and opened through the
//! channel; the key itself never leaves this module.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::crypto::{Aead, AeadKey};
use crate::error::{Error, Result};

/// AEAD state bound to one completed session.
pub struct SecureChannel {
    aead: Aead,
    established_at: Instant,
}

impl SecureChannel {
    /// Take ownership of `key`; it is zeroized once the cipher is keyed.
    pub fn new(key: AeadKey) -> Self {
        Self {
            aead: Aead::new(&key),
            established_at: Instant::now(),
        }
    }

    /// Seal as `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.aead.seal(plaintext, aad)
    }

    /// Open a sealed frame, failing with [`Error::Crypto`] on tampering.
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.aead.open(sealed, aad)
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    pub fn is_expired(&self, lifetime: Duration) -> bool {
        self.established_at.elapsed() >= lifetime
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

/// Established channels by session id.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<SecureChannel>>>,
    lifetime: Duration,
}

impl ChannelRegistry {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    /// Register the key derived for `session_id`.
    pub fn establish(&self, session_id: &str, key: AeadKey) {
        let channel = Arc::new(SecureChannel::new(key));
        self.channels.write().insert(session_id.to_string(), channel);
        tracing::debug!(session_id, "Secure channel established");
    }

    /// Channel for `session_id`, if established and not past its lifetime.
    pub fn get(&self, session_id: &str) -> Result<Arc<SecureChannel>> {
        let channel = self
            .channels
            .read()
            .get(session_id)
            .cloned()
            .ok_or(Error::ChannelNotFound)?;

        if channel.is_expired(self.lifetime) {
            self.close(session_id);
            return Err(Error::ChannelNotFound);
        }
        Ok(channel)
    }

    /// Drop a channel. Returns whether one was present.
    pub fn close(&self, session_id: &str) -> bool {
        self.channels.write().remove(session_id).is_some()
    }

    /// Drop every channel past its lifetime; returns how many.
    pub fn sweep(&self) -> usize {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|_, c| !c.is_expired(self.lifetime));
        let removed = before - channels.len();

        if removed > 0 {
            tracing::debug!("Closed {} expired secure channels", removed);
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.channels.read().len()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.count())
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> AeadKey {
        AeadKey::from_bytes([byte; 32])
    }

    #[tokio::test]
    async fn test_establish_and_use() {
        let registry = ChannelRegistry::new(Duration::from_secs(60));
        registry.establish("sid", key(7));

        let channel = registry.get("sid").unwrap();
        let sealed = channel.seal(b"report", b"a.txt").unwrap();

        // The peer holding the same key can open it
        let peer = SecureChannel::new(key(7));
        assert_eq!(peer.open(&sealed, b"a.txt").unwrap(), b"report");
        assert!(matches!(peer.open(&sealed, b"b.txt"), Err(Error::Crypto(_))));
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let registry = ChannelRegistry::new(Duration::from_secs(60));
        assert!(matches!(registry.get("nope"), Err(Error::ChannelNotFound)));
        assert!(!registry.close("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifetime_enforced() {
        let registry = ChannelRegistry::new(Duration::from_secs(60));
        registry.establish("a", key(1));
        tokio::time::advance(Duration::from_secs(30)).await;
        registry.establish("b", key(2));
        tokio::time::advance(Duration::from_secs(30)).await;

        // Lazy expiry on access
        assert!(matches!(registry.get("a"), Err(Error::ChannelNotFound)));
        assert!(registry.get("b").is_ok());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.count(), 0);
    }
}
