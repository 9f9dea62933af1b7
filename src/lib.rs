//! # SecureFileXchange (SFX)
//!
//! Diffie-Hellman key-exchange sessions feeding an authenticated-encryption
//! channel for file transfer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │         HTTP Layer (axum routes, rate limiting)          │
//! ├─────────────────────────────────────────────────────────┤
//! │   File Exchange (sealed uploads, downloads, listing)     │
//! ├─────────────────────────────────────────────────────────┤
//! │   Secure Channels (per-session ChaCha20-Poly1305)        │
//! ├─────────────────────────────────────────────────────────┤
//! │   Key Exchange (session store, single-use completion)    │
//! ├─────────────────────────────────────────────────────────┤
//! │   Crypto Layer (finite-field DH, HKDF-SHA256, PEM/DER)   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Goals
//!
//! 1. **Fresh parameters**: every exchange gets its own prime and key pair
//! 2. **Single use**: a session yields its key exactly once, then is retired
//! 3. **Bounded lifetime**: unfinished exchanges expire; secrets are zeroized
//! 4. **No key on the wire**: derived keys only ever reach the channel registry

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

use std::time::Duration;

pub mod audit;
pub mod channel;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod files;

#[cfg(feature = "server")]
pub mod server;

pub use error::{Error, Result};

/// Age at which an unfinished key exchange expires.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// How long a retired session id keeps answering with its final state.
pub const DEFAULT_TOMBSTONE_RETENTION: Duration = Duration::from_secs(600);

/// Upper bound on pending key exchanges.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Lifetime of a secure channel after its exchange completes.
pub const DEFAULT_CHANNEL_LIFETIME: Duration = Duration::from_secs(3600);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lifetimes_are_consistent() {
        assert!(DEFAULT_TOMBSTONE_RETENTION >= DEFAULT_SESSION_TIMEOUT);
        assert!(DEFAULT_CHANNEL_LIFETIME > DEFAULT_SESSION_TIMEOUT);
    }
}
