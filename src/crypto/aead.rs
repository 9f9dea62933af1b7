//! ChaCha20-Poly1305 sealing for channel payloads.
//!
//! A sealed frame is self-contained: `nonce(12) || ciphertext || tag(16)`.
//! The caller supplies associated data binding the frame to its context
//! (the session id for stored files).

use chacha20poly1305::{
    aead::{Aead as AeadTrait, KeyInit, Payload},
    ChaCha20Poly1305,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{SecureRandom, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};

/// A symmetric key for AEAD operations.
///
/// Automatically zeroized when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Create a new AEAD key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes. Secret material.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AeadKey(<redacted>)")
    }
}

/// 96-bit nonce. Never reused under one key; uploads draw it at random.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Draw a nonce from the OS entropy source.
    pub fn random() -> Result<Self> {
        Ok(Self(SecureRandom::bytes()?))
    }

    /// Nonce read back from a sealed frame.
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// Cipher keyed with one session's derived key.
pub struct Aead {
    cipher: ChaCha20Poly1305,
}

impl Aead {
    pub fn new(key: &AeadKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.as_bytes().into()),
        }
    }

    /// Returns `ciphertext || tag`.
    pub fn encrypt(&self, nonce: &Nonce, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(nonce.as_bytes().into(), Payload { msg: plaintext, aad })
            .map_err(|_| Error::crypto("payload could not be sealed"))
    }

    /// Fails with [`Error::Crypto`] on a wrong key, wrong associated data or
    /// any tampering.
    pub fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::Buffer {
                expected: TAG_SIZE,
                actual: ciphertext.len(),
            });
        }

        self.cipher
            .decrypt(nonce.as_bytes().into(), Payload { msg: ciphertext, aad })
            .map_err(|_| Error::crypto("payload failed authentication"))
    }

    /// Encrypt under a fresh random nonce and frame as `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::random()?;
        let ciphertext = self.encrypt(&nonce, plaintext, aad)?;

        let mut sealed = Vec::with_capacity(sealed_len(plaintext.len()));
        sealed.extend_from_slice(nonce.as_bytes());
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Reverse [`Aead::seal`].
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Buffer {
                expected: NONCE_SIZE + TAG_SIZE,
                actual: sealed.len(),
            });
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        self.decrypt(&Nonce::from_bytes(nonce), ciphertext, aad)
    }
}

/// Length of a sealed frame for a given plaintext length.
pub const fn sealed_len(plaintext_len: usize) -> usize {
    NONCE_SIZE + plaintext_len + TAG_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> AeadKey {
        AeadKey::from_bytes([
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07,
            0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
            0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17,
            0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f,
        ])
    }

    #[test]
    fn test_frame_layout() {
        let aead = Aead::new(&test_key());
        let sealed = aead.seal(b"quarterly.xlsx bytes", b"session-1").unwrap();

        // The leading nonce plus the tail decrypt directly
        let nonce = Nonce::from_bytes(sealed[..NONCE_SIZE].try_into().unwrap());
        let body = aead.decrypt(&nonce, &sealed[NONCE_SIZE..], b"session-1").unwrap();
        assert_eq!(body, b"quarterly.xlsx bytes");
    }

    #[test]
    fn test_wrong_key_fails() {
        let aead1 = Aead::new(&test_key());
        let aead2 = Aead::new(&AeadKey::from_bytes([0x42u8; KEY_SIZE]));

        let sealed = aead1.seal(b"secret data", b"").unwrap();
        assert!(aead2.open(&sealed, b"").is_err());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let aead = Aead::new(&test_key());

        let sealed = aead.seal(b"secret data", b"context1").unwrap();
        assert!(aead.open(&sealed, b"context2").is_err());
    }

    #[test]
    fn test_seal_open() {
        let aead = Aead::new(&test_key());
        let plaintext = b"file contents";

        let sealed = aead.seal(plaintext, b"report.pdf").unwrap();
        assert_eq!(sealed.len(), sealed_len(plaintext.len()));

        let opened = aead.open(&sealed, b"report.pdf").unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_seal_uses_fresh_nonces() {
        let aead = Aead::new(&test_key());

        let a = aead.seal(b"same", b"").unwrap();
        let b = aead.seal(b"same", b"").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_frame_fails() {
        let aead = Aead::new(&test_key());

        let mut sealed = aead.seal(b"secret data", b"").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(matches!(aead.open(&sealed, b""), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_short_frame_rejected() {
        let aead = Aead::new(&test_key());
        let err = aead.open(&[0u8; NONCE_SIZE + TAG_SIZE - 1], b"").unwrap_err();
        assert!(matches!(err, Error::Buffer { .. }));
    }

    #[test]
    fn test_key_debug_is_redacted() {
        assert_eq!(format!("{:?}", test_key()), "AeadKey(<redacted>)");
    }
}
