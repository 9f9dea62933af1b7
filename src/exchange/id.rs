//! Self-authenticating session ids.
//!
//! An id is `base64url(nonce || HMAC-SHA256(key, nonce)[..16])` under a key
//! held only by the issuing store. A well-formed id that verifies was issued
//! by this store, so once it is no longer live it is known to be retired
//! even after its tombstone is gone.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::{SecureRandom, KEY_SIZE};
use crate::error::{Error, Result};
use crate::exchange::SessionId;

type HmacSha256 = Hmac<Sha256>;

/// Random bytes carried by an id.
const NONCE_BYTES: usize = 16;

/// Truncated MAC bytes carried by an id.
const TAG_BYTES: usize = 16;

/// Length of an encoded id.
pub const SESSION_ID_LEN: usize = 43;

/// Issues and recognises session ids for one store.
pub(crate) struct SessionIdIssuer {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl SessionIdIssuer {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            key: Zeroizing::new(SecureRandom::bytes()?),
        })
    }

    fn mac(&self) -> Result<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(self.key.as_slice())
            .map_err(|_| Error::crypto("invalid session id key"))
    }

    /// A fresh id carrying `NONCE_BYTES` of randomness.
    pub(crate) fn issue(&self) -> Result<SessionId> {
        let nonce = SecureRandom::bytes::<NONCE_BYTES>()?;
        let mut mac = self.mac()?;
        mac.update(&nonce);
        let tag = mac.finalize().into_bytes();

        let mut raw = [0u8; NONCE_BYTES + TAG_BYTES];
        raw[..NONCE_BYTES].copy_from_slice(&nonce);
        raw[NONCE_BYTES..].copy_from_slice(&tag[..TAG_BYTES]);
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Whether `id` was issued under this key. Constant time in the tag.
    pub(crate) fn recognises(&self, id: &str) -> bool {
        if id.len() != SESSION_ID_LEN {
            return false;
        }
        let Ok(raw) = URL_SAFE_NO_PAD.decode(id) else {
            return false;
        };
        if raw.len() != NONCE_BYTES + TAG_BYTES {
            return false;
        }
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(&raw[..NONCE_BYTES]);
        mac.verify_truncated_left(&raw[NONCE_BYTES..]).is_ok()
    }
}

impl std::fmt::Debug for SessionIdIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionIdIssuer(<redacted>)")
    }
}
