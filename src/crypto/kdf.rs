//! Session key derivation.
//!
//! HKDF-SHA256 turns a raw DH shared value into the 256-bit key of the
//! session's channel. The raw value never leaves this step.

use hkdf::Hkdf as HkdfImpl;
use sha2::Sha256;

use crate::crypto::{AeadKey, RawSharedValue, KEY_SIZE};
use crate::error::{Error, Result};

/// Context string bound into every session key.
const SESSION_KEY_INFO: &[u8] = b"SFX_v1 file channel key";

/// Extract-then-expand over SHA-256.
pub struct Hkdf {
    prk: HkdfImpl<Sha256>,
}

impl Hkdf {
    /// Run the extract step over `ikm`.
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        Self {
            prk: HkdfImpl::new(salt, ikm),
        }
    }

    /// `len` bytes of output keying material for `info`.
    pub fn expand(&self, info: &[u8], len: usize) -> Result<Vec<u8>> {
        let mut okm = vec![0u8; len];
        self.prk
            .expand(info, &mut okm)
            .map_err(|_| Error::crypto("HKDF expansion failed"))?;
        Ok(okm)
    }

    pub fn expand_fixed<const N: usize>(&self, info: &[u8]) -> Result<[u8; N]> {
        let mut okm = [0u8; N];
        self.prk
            .expand(info, &mut okm)
            .map_err(|_| Error::crypto("HKDF expansion failed"))?;
        Ok(okm)
    }

    /// 256-bit channel key for `info`.
    pub fn derive_aead_key(&self, info: &[u8]) -> Result<AeadKey> {
        let key_bytes = self.expand_fixed::<KEY_SIZE>(info)?;
        Ok(AeadKey::from_bytes(key_bytes))
    }
}

/// Derive the session key from a raw shared value.
///
/// The session id is the HKDF salt, so two sessions never share a key even
/// if their raw shared values collide. Deterministic for identical inputs.
pub fn derive_session_key(shared: &RawSharedValue, session_id: &str) -> Result<AeadKey> {
    Hkdf::new(Some(session_id.as_bytes()), shared.as_bytes()).derive_aead_key(SESSION_KEY_INFO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{DhGenerator, KeyPair};

    #[test]
    fn test_oversized_expand_rejected() {
        // HKDF-SHA256 caps output at 255 blocks
        let hkdf = Hkdf::new(None, b"ikm");
        assert!(matches!(hkdf.expand(b"info", 255 * 32 + 1), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_hkdf_rfc5869_case_1() {
        let ikm = [0x0bu8; 22];
        let salt: Vec<u8> = (0x00u8..=0x0c).collect();
        let info: Vec<u8> = (0xf0u8..=0xf9).collect();

        let okm = Hkdf::new(Some(&salt), &ikm).expand(&info, 42).unwrap();
        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn test_session_key_is_deterministic() {
        let shared = RawSharedValue::from_bytes(vec![0x42; 256]);

        let k1 = derive_session_key(&shared, "session-a").unwrap();
        let k2 = derive_session_key(&shared, "session-a").unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn test_colliding_shared_values_give_distinct_keys() {
        // Crafted collision: both sessions see the exact same raw value
        let shared_a = RawSharedValue::from_bytes(vec![0x5a; 256]);
        let shared_b = RawSharedValue::from_bytes(vec![0x5a; 256]);

        let key_a = derive_session_key(&shared_a, "AAAAAAAAAAAAAAAAAAAAAA").unwrap();
        let key_b = derive_session_key(&shared_b, "BBBBBBBBBBBBBBBBBBBBBB").unwrap();
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn test_both_sides_derive_same_key() {
        let (params, server) = DhGenerator::insecure_for_tests(256).generate().unwrap();
        let client = KeyPair::generate(&params).unwrap();

        let server_shared = server.compute_shared(&params, client.public()).unwrap();
        let client_shared = client.compute_shared(&params, server.public()).unwrap();

        let server_key = derive_session_key(&server_shared, "sid").unwrap();
        let client_key = derive_session_key(&client_shared, "sid").unwrap();
        assert_eq!(server_key, client_key);
    }
}
