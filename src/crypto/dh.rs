//! Finite-field Diffie-Hellman primitives.
//!
//! Every exchange gets freshly generated domain parameters (a random prime
//! modulus with generator 2) and a fresh key pair. Secret exponents and raw
//! shared values are zeroized on drop.

use std::fmt;

use num_bigint_dig::prime::probably_prime;
use num_bigint_dig::{BigUint, RandBigInt};
use num_traits::{One, ToPrimitive};
use rand::rngs::OsRng;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{SecureRandom, DH_GENERATOR, MIN_MODULUS_BITS};
use crate::error::{Error, Result};

/// Miller-Rabin rounds used when testing prime candidates.
const PRIMALITY_ROUNDS: usize = 20;

/// Small primes below this bound sieve safe-prime candidates.
const SIEVE_BOUND: u32 = 2048;

/// Consecutive odd offsets scanned from one random safe-prime start.
const SIEVE_WINDOW: u32 = 1 << 16;

/// Fewest attempts a safe-prime search should be given.
///
/// Roughly one sieved 2048-bit candidate in a few thousand is a safe prime.
pub const MIN_SAFE_PRIME_ATTEMPTS: u32 = 50_000;

/// Diffie-Hellman domain parameters: prime modulus `p` and generator `g`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DhParameters {
    p: BigUint,
    g: BigUint,
}

impl DhParameters {
    /// Build parameters from a modulus and generator.
    ///
    /// Only structural checks are made here; primality is the generator's job.
    pub fn new(p: BigUint, g: BigUint) -> Result<Self> {
        let two = BigUint::from(2u32);
        if p <= BigUint::from(5u32) {
            return Err(Error::invalid_peer_key("modulus too small"));
        }
        if g < two || g >= p {
            return Err(Error::invalid_peer_key("generator out of range"));
        }
        Ok(Self { p, g })
    }

    /// The prime modulus.
    pub fn modulus(&self) -> &BigUint {
        &self.p
    }

    /// The generator.
    pub fn generator(&self) -> &BigUint {
        &self.g
    }

    /// Bit length of the modulus.
    pub fn bits(&self) -> usize {
        self.p.bits()
    }

    /// Modulus length in bytes, the width of every encoded shared value.
    pub fn byte_len(&self) -> usize {
        (self.bits() + 7) / 8
    }

    /// Check that a public value lies in `[2, p-2]`.
    ///
    /// This excludes 0, 1 and p-1, the identity and order-2 elements that
    /// would collapse the shared value into a trivially guessable one.
    pub fn check_public(&self, value: &BigUint) -> Result<()> {
        let two = BigUint::from(2u32);
        let upper = &self.p - &two;
        if *value < two || *value > upper {
            return Err(Error::invalid_peer_key("public value outside [2, p-2]"));
        }
        Ok(())
    }
}

/// Secret DH exponent. Zeroized on drop and never printed.
pub struct PrivateExponent(BigUint);

impl PrivateExponent {
    fn value(&self) -> &BigUint {
        &self.0
    }
}

impl Drop for PrivateExponent {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for PrivateExponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateExponent(<redacted>)")
    }
}

/// One side's key pair: secret exponent `x` and public value `y = g^x mod p`.
#[derive(Debug)]
pub struct KeyPair {
    private: PrivateExponent,
    public: BigUint,
}

impl KeyPair {
    /// Generate a key pair for existing parameters.
    ///
    /// The exponent is drawn from the OS entropy source in `[2, p-2]`.
    pub fn generate(params: &DhParameters) -> Result<Self> {
        // Touch the entropy source so an unavailable RNG surfaces as an error
        // rather than a panic inside the big-integer sampler.
        SecureRandom::bytes::<16>()?;

        let low = BigUint::from(2u32);
        let high = &params.p - BigUint::one();
        let x = OsRng.gen_biguint_range(&low, &high);
        let y = params.g.modpow(&x, &params.p);

        Ok(Self {
            private: PrivateExponent(x),
            public: y,
        })
    }

    /// The public value `y`.
    pub fn public(&self) -> &BigUint {
        &self.public
    }

    /// Compute the raw shared value `z = peer^x mod p`.
    ///
    /// Rejects peer values outside `[2, p-2]` with [`Error::InvalidPeerKey`].
    pub fn compute_shared(&self, params: &DhParameters, peer: &BigUint) -> Result<RawSharedValue> {
        params.check_public(peer)?;

        let mut z = peer.modpow(self.private.value(), &params.p);
        if z <= BigUint::one() {
            z.zeroize();
            return Err(Error::invalid_peer_key("degenerate shared value"));
        }

        let shared = RawSharedValue::from_biguint(&z, params.byte_len());
        z.zeroize();
        Ok(shared)
    }
}

/// Raw DH output, big-endian and left-padded to the modulus width.
///
/// Must be fed into the KDF and dropped; it is zeroized on drop.
pub struct RawSharedValue(Zeroizing<Vec<u8>>);

impl RawSharedValue {
    fn from_biguint(z: &BigUint, width: usize) -> Self {
        let digits = Zeroizing::new(z.to_bytes_be());
        let mut padded = Zeroizing::new(vec![0u8; width.max(digits.len())]);
        let offset = padded.len() - digits.len();
        padded[offset..].copy_from_slice(&digits);
        Self(padded)
    }

    /// Wrap raw bytes. Used for crafted values in KDF tests and benches.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Get the raw shared value bytes.
    ///
    /// # Security
    ///
    /// This should be fed into a KDF (like HKDF) before use as a key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RawSharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawSharedValue(<{} bytes redacted>)", self.0.len())
    }
}

/// Produces fresh parameters and a key pair for every session.
#[derive(Clone, Copy, Debug)]
pub struct DhGenerator {
    modulus_bits: usize,
    max_attempts: u32,
    safe_prime: bool,
}

impl DhGenerator {
    /// Create a generator for moduli of `modulus_bits` bits.
    ///
    /// `max_attempts` bounds the number of prime candidates tested before
    /// giving up with [`Error::Generation`].
    pub fn new(modulus_bits: usize, max_attempts: u32) -> Result<Self> {
        if modulus_bits < MIN_MODULUS_BITS {
            return Err(Error::config(format!(
                "modulus must be at least {} bits, got {}",
                MIN_MODULUS_BITS, modulus_bits
            )));
        }
        Ok(Self {
            modulus_bits,
            max_attempts,
            safe_prime: false,
        })
    }

    /// Generator with a small modulus, for unit tests only.
    #[cfg(test)]
    pub(crate) fn insecure_for_tests(modulus_bits: usize) -> Self {
        Self {
            modulus_bits,
            max_attempts: 100_000,
            safe_prime: false,
        }
    }

    /// Require `p = 2q + 1` with `q` prime.
    ///
    /// Much slower: each attempt needs two primes to line up.
    pub fn with_safe_prime(mut self, safe_prime: bool) -> Self {
        self.safe_prime = safe_prime;
        self
    }

    /// Override the attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Configured modulus size.
    pub fn modulus_bits(&self) -> usize {
        self.modulus_bits
    }

    /// Generate fresh parameters and a key pair.
    ///
    /// CPU-bound; callers on an async runtime should run it on a blocking
    /// thread and must not hold any shared lock while it runs.
    pub fn generate(&self) -> Result<(DhParameters, KeyPair)> {
        SecureRandom::bytes::<16>()?;

        let p = if self.safe_prime {
            self.search_safe_prime()?
        } else {
            self.search_prime()?
        };
        let params = DhParameters {
            p,
            g: BigUint::from(DH_GENERATOR),
        };
        let keypair = KeyPair::generate(&params)?;
        Ok((params, keypair))
    }

    fn search_prime(&self) -> Result<BigUint> {
        for _ in 0..self.max_attempts {
            let candidate = odd_candidate(self.modulus_bits);
            if probably_prime(&candidate, PRIMALITY_ROUNDS) {
                return Ok(candidate);
            }
        }
        Err(self.exhausted())
    }

    /// Search for `p = 2q + 1` with both `q` and `p` prime.
    ///
    /// Offsets from a random odd `q` are sieved so that `q` and `2q + 1` both
    /// avoid every small prime factor. Only candidates surviving the sieve
    /// count as attempts.
    fn search_safe_prime(&self) -> Result<BigUint> {
        let q_bits = self.modulus_bits - 1;
        let sieve = small_primes(SIEVE_BOUND, q_bits);
        let mut attempts = 0u32;

        while attempts < self.max_attempts {
            let start = odd_candidate(q_bits);
            let residues: Vec<u32> = sieve
                .iter()
                .map(|&r| (&start % BigUint::from(r)).to_u32().unwrap_or_default())
                .collect();

            for offset in (0..SIEVE_WINDOW).step_by(2) {
                let survives = sieve.iter().zip(&residues).all(|(&r, &res)| {
                    let q_mod = (res + offset) % r;
                    q_mod != 0 && (2 * q_mod + 1) % r != 0
                });
                if !survives {
                    continue;
                }

                let q = &start + BigUint::from(offset);
                if q.bits() != q_bits {
                    break;
                }

                attempts += 1;
                if probably_prime(&q, PRIMALITY_ROUNDS) {
                    let p = (q << 1usize) + BigUint::one();
                    if probably_prime(&p, PRIMALITY_ROUNDS) {
                        return Ok(p);
                    }
                }
                if attempts >= self.max_attempts {
                    break;
                }
            }
        }
        Err(self.exhausted())
    }

    fn exhausted(&self) -> Error {
        Error::generation(format!(
            "no {}-bit prime found in {} attempts",
            self.modulus_bits, self.max_attempts
        ))
    }
}

/// Odd primes below `bound` that are also far below `2^(bits - 2)`, so a
/// `bits`-bit candidate can never equal one of them.
fn small_primes(bound: u32, bits: usize) -> Vec<u32> {
    let limit = if bits >= 34 {
        bound
    } else {
        bound.min(1u32 << bits.saturating_sub(2))
    };

    let mut composite = vec![false; limit as usize];
    let mut primes = Vec::new();
    for n in 3..limit {
        if composite[n as usize] || n % 2 == 0 {
            continue;
        }
        primes.push(n);
        for multiple in (n * n..limit).step_by(n as usize) {
            composite[multiple as usize] = true;
        }
    }
    primes
}

/// Random odd integer with exactly `bits` bits.
fn odd_candidate(bits: usize) -> BigUint {
    let top = BigUint::one() << (bits - 1);
    OsRng.gen_biguint(bits) | top | BigUint::one()
}
