//! OS entropy for exponents, nonces, session ids and stored file names.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};

/// Fallible access to the OS entropy source.
pub struct SecureRandom;

impl SecureRandom {
    /// Fails with [`Error::Generation`] if the entropy source is unavailable.
    pub fn fill(dest: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| Error::generation(format!("entropy source unavailable: {}", e)))
    }

    pub fn bytes<const N: usize>() -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        Self::fill(&mut buf)?;
        Ok(buf)
    }

    /// Unpadded URL-safe base64 of `N` random bytes.
    pub fn token<const N: usize>() -> Result<String> {
        let raw = Self::bytes::<N>()?;
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_fill_is_not_constant() {
        let mut buf = [0u8; 64];
        SecureRandom::fill(&mut buf).unwrap();
        assert!(!buf.iter().all(|&b| b == 0));

        let a: [u8; 16] = SecureRandom::bytes().unwrap();
        let b: [u8; 16] = SecureRandom::bytes().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_is_url_safe() {
        let token = SecureRandom::token::<16>().unwrap();

        // 16 bytes -> 22 unpadded base64 characters
        assert_eq!(token.len(), 22);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens: HashSet<String> = (0..256)
            .map(|_| SecureRandom::token::<16>().unwrap())
            .collect();
        assert_eq!(tokens.len(), 256);
    }
}
