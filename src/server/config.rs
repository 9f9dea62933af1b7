//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{DhGenerator, MIN_MODULUS_BITS, MIN_SAFE_PRIME_ATTEMPTS};
use crate::error::{Error, Result};
use crate::exchange::StoreConfig;

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: String,
    /// Listen port
    pub listen_port: u16,
    /// DH modulus size in bits
    pub modulus_bits: usize,
    /// Prime candidates tried before generation gives up
    pub generation_max_attempts: u32,
    /// Generate safe primes (much slower)
    pub safe_prime: bool,
    /// Age at which an unfinished exchange expires
    pub session_timeout: Duration,
    /// Interval between background sweeps
    pub sweep_interval: Duration,
    /// How long retired session ids are remembered
    pub tombstone_retention: Duration,
    /// Maximum concurrent pending exchanges
    pub max_sessions: usize,
    /// Lifetime of an established secure channel
    pub channel_lifetime: Duration,
    /// Rate limit: max init requests per window
    pub rate_limit_requests: u32,
    /// Rate limit: window duration
    pub rate_limit_window: Duration,
    /// Directory for sealed uploads
    pub upload_dir: PathBuf,
    /// Largest accepted upload
    pub max_upload_bytes: usize,
    /// JSON-lines audit file; audit goes to tracing when unset
    pub audit_log: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8000,
            modulus_bits: MIN_MODULUS_BITS,
            generation_max_attempts: 10_000,
            safe_prime: false,
            session_timeout: crate::DEFAULT_SESSION_TIMEOUT,
            sweep_interval: Duration::from_secs(30),
            tombstone_retention: crate::DEFAULT_TOMBSTONE_RETENTION,
            max_sessions: crate::DEFAULT_MAX_SESSIONS,
            channel_lifetime: crate::DEFAULT_CHANNEL_LIFETIME,
            rate_limit_requests: 30,
            rate_limit_window: Duration::from_secs(60),
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 64 * 1024 * 1024,
            audit_log: None,
        }
    }
}

impl ServerConfig {
    /// Address string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }

    /// The DH generator these settings describe.
    pub fn generator(&self) -> Result<DhGenerator> {
        Ok(DhGenerator::new(self.modulus_bits, self.generation_max_attempts)?
            .with_safe_prime(self.safe_prime))
    }

    /// Session store limits.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            session_timeout: self.session_timeout,
            tombstone_retention: self.tombstone_retention,
            max_sessions: self.max_sessions,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            return Err(Error::config("listen_addr cannot be empty"));
        }
        if self.modulus_bits < MIN_MODULUS_BITS {
            return Err(Error::config(format!(
                "modulus_bits must be at least {}",
                MIN_MODULUS_BITS
            )));
        }
        if self.generation_max_attempts == 0 {
            return Err(Error::config("generation_max_attempts must be positive"));
        }
        if self.safe_prime && self.generation_max_attempts < MIN_SAFE_PRIME_ATTEMPTS {
            return Err(Error::config(format!(
                "safe_prime needs generation_max_attempts of at least {}",
                MIN_SAFE_PRIME_ATTEMPTS
            )));
        }
        if self.session_timeout.is_zero() {
            return Err(Error::config("session_timeout must be positive"));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::config("sweep_interval must be positive"));
        }
        if self.tombstone_retention < self.session_timeout {
            return Err(Error::config(
                "tombstone_retention must not be shorter than session_timeout",
            ));
        }
        if self.max_sessions == 0 {
            return Err(Error::config("max_sessions must be positive"));
        }
        if self.channel_lifetime.is_zero() {
            return Err(Error::config("channel_lifetime must be positive"));
        }
        if self.rate_limit_requests == 0 || self.rate_limit_window.is_zero() {
            return Err(Error::config("rate limit must allow at least one request"));
        }
        if self.max_upload_bytes == 0 {
            return Err(Error::config("max_upload_bytes must be positive"));
        }
        Ok(())
    }
}

/// Configuration file format for serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfigFile {
    /// Listen address
    pub listen_addr: String,
    /// Listen port
    pub listen_port: u16,
    /// DH modulus size in bits
    pub modulus_bits: usize,
    /// Prime candidates tried before giving up
    pub generation_max_attempts: u32,
    /// Generate safe primes
    pub safe_prime: bool,
    /// Session timeout (seconds)
    pub session_timeout_secs: u64,
    /// Sweep interval (seconds)
    pub sweep_interval_secs: u64,
    /// Tombstone retention (seconds)
    pub tombstone_retention_secs: u64,
    /// Maximum concurrent pending exchanges
    pub max_sessions: usize,
    /// Channel lifetime (seconds)
    pub channel_lifetime_secs: u64,
    /// Rate limit: max requests
    pub rate_limit_requests: u32,
    /// Rate limit: window seconds
    pub rate_limit_window_secs: u64,
    /// Directory for sealed uploads
    pub upload_dir: PathBuf,
    /// Largest accepted upload (bytes)
    pub max_upload_bytes: usize,
    /// JSON-lines audit file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl ServerConfigFile {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(format!("invalid config file: {}", e)))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Convert to runtime configuration.
    pub fn to_config(&self) -> Result<ServerConfig> {
        let config = ServerConfig {
            listen_addr: self.listen_addr.clone(),
            listen_port: self.listen_port,
            modulus_bits: self.modulus_bits,
            generation_max_attempts: self.generation_max_attempts,
            safe_prime: self.safe_prime,
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            tombstone_retention: Duration::from_secs(self.tombstone_retention_secs),
            max_sessions: self.max_sessions,
            channel_lifetime: Duration::from_secs(self.channel_lifetime_secs),
            rate_limit_requests: self.rate_limit_requests,
            rate_limit_window: Duration::from_secs(self.rate_limit_window_secs),
            upload_dir: self.upload_dir.clone(),
            max_upload_bytes: self.max_upload_bytes,
            audit_log: self.audit_log.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            listen_addr: config.listen_addr.clone(),
            listen_port: config.listen_port,
            modulus_bits: config.modulus_bits,
            generation_max_attempts: config.generation_max_attempts,
            safe_prime: config.safe_prime,
            session_timeout_secs: config.session_timeout.as_secs(),
            sweep_interval_secs: config.sweep_interval.as_secs(),
            tombstone_retention_secs: config.tombstone_retention.as_secs(),
            max_sessions: config.max_sessions,
            channel_lifetime_secs: config.channel_lifetime.as_secs(),
            rate_limit_requests: config.rate_limit_requests,
            rate_limit_window_secs: config.rate_limit_window.as_secs(),
            upload_dir: config.upload_dir.clone(),
            max_upload_bytes: config.max_upload_bytes,
            audit_log: config.audit_log.clone(),
        }
    }
}
