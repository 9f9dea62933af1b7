//! Cryptographic primitives for SFX.
//!
//! This module provides:
//! - Finite-field Diffie-Hellman with per-session parameters
//! - PKCS#3 / SubjectPublicKeyInfo PEM encodings
//! - HKDF key derivation
//! - ChaCha20-Poly1305 AEAD encryption
//! - Secure random number generation
//!
//! All secret material is zeroized on drop to prevent memory leakage.

mod aead;
mod dh;
pub mod encoding;
mod kdf;
mod random;

pub use aead::{sealed_len, Aead, AeadKey, Nonce};
pub use dh::{
    DhGenerator, DhParameters, KeyPair, PrivateExponent, RawSharedValue, MIN_SAFE_PRIME_ATTEMPTS,
};
pub use encoding::PeerPublicKey;
pub use kdf::{derive_session_key, Hkdf};
pub use random::SecureRandom;

/// Size of symmetric keys in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of AEAD nonce in bytes (96 bits for ChaCha20-Poly1305)
pub const NONCE_SIZE: usize = 12;

/// Size of AEAD authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Smallest modulus accepted outside of tests.
pub const MIN_MODULUS_BITS: usize = 2048;

/// DH generator used for every session.
pub const DH_GENERATOR: u32 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key_exchange_and_encryption() {
        // Server side: fresh parameters and key pair for the session
        let (params, server) = DhGenerator::insecure_for_tests(256).generate().unwrap();

        // Client receives the encoded parameters and answers with its own key
        let params_pem = encoding::parameters_to_pem(&params).unwrap();
        let client_params = encoding::parameters_from_pem(params_pem.as_bytes()).unwrap();
        let client = KeyPair::generate(&client_params).unwrap();
        let client_pem = encoding::public_key_to_pem(&client_params, client.public()).unwrap();

        // Server decodes the peer key and both sides derive the session key
        let peer = encoding::public_key_from_pem(client_pem.as_bytes()).unwrap();
        let server_shared = server.compute_shared(&params, &peer.value).unwrap();
        let client_shared = client.compute_shared(&client_params, server.public()).unwrap();

        let server_key = derive_session_key(&server_shared, "session").unwrap();
        let client_key = derive_session_key(&client_shared, "session").unwrap();
        assert_eq!(server_key, client_key);

        // Client seals a file, server opens it
        let sealed = Aead::new(&client_key).seal(b"Hello, secure world!", b"hello.txt").unwrap();
        let opened = Aead::new(&server_key).open(&sealed, b"hello.txt").unwrap();
        assert_eq!(opened, b"Hello, secure world!");
    }
}
