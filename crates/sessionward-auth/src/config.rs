//! Lifecycle manager configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [lifecycle]
//! issuer = "https://auth.example.com"
//! access_ttl = "15m"
//! refresh_ttl = "7d"
//! backend = "distributed"
//! backend_connection = "redis://localhost:6379"
//!
//! [lifecycle.signing.current]
//! kid = "2026-10"
//! algorithm = "HS256"
//! secret = "..."
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::token::{JwtError, SigningAlgorithm, SigningKeyPair, TokenCodec};
use crate::token::jwt::MIN_SECRET_LEN;

/// Root configuration of the lifecycle manager.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Issuer written to (and required in) access tokens.
    pub issuer: String,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_ttl: Duration,

    /// Refresh token lifetime, renewed on every rotation.
    #[serde(with = "humantime_serde")]
    pub refresh_ttl: Duration,

    /// Absolute lifetime of a session regardless of rotation.
    #[serde(with = "humantime_serde")]
    pub session_max_age: Option<Duration>,

    /// Token store backend.
    pub backend: BackendKind,

    /// Connection string, required for the distributed backend.
    pub backend_connection: Option<String>,

    /// Upper bound on a single store operation; exceeded means unavailable.
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,

    /// Sweep interval of the cleanup worker (in-memory backend only).
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Distributed backend tuning.
    pub redis: RedisOptions,

    /// Access token signing keys.
    pub signing: SigningConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            access_ttl: Duration::from_secs(15 * 60),         // 15 minutes
            refresh_ttl: Duration::from_secs(7 * 24 * 3600),  // 7 days
            session_max_age: None,
            backend: BackendKind::Memory,
            backend_connection: None,
            store_timeout: Duration::from_millis(300),
            cleanup_interval: Duration::from_secs(5 * 60),    // 5 minutes
            redis: RedisOptions::default(),
            signing: SigningConfig::default(),
        }
    }
}

/// Token store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process map, single instance only.
    #[default]
    Memory,
    /// Shared store for multi-instance deployments.
    Distributed,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Distributed => write!(f, "distributed"),
        }
    }
}

/// Distributed backend options.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisOptions {
    /// Connection pool size.
    pub pool_size: usize,

    /// Prefix for every key written.
    pub key_prefix: String,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            pool_size: 10,
            key_prefix: "sessionward".to_string(),
        }
    }
}

/// Signing key configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Key used to sign new tokens.
    pub current: SigningKeyConfig,

    /// Key still accepted for verification during rotation.
    pub previous: Option<SigningKeyConfig>,

    /// How long after startup the previous key is accepted.
    /// Should be at least `access_ttl`.
    #[serde(with = "humantime_serde")]
    pub previous_key_grace: Duration,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            current: SigningKeyConfig::default(),
            previous: None,
            previous_key_grace: Duration::from_secs(15 * 60),
        }
    }
}

/// One signing key.
///
/// HMAC algorithms take `secret`; RSA/EC algorithms take PEM keys.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningKeyConfig {
    /// Key ID written to the token header.
    pub kid: String,

    /// One of HS256, HS384, HS512, RS256, RS384, ES384.
    pub algorithm: String,

    /// Shared secret for HMAC algorithms.
    pub secret: Option<String>,

    /// PKCS#8 private key for asymmetric algorithms.
    pub private_key_pem: Option<String>,

    /// Public key for asymmetric algorithms.
    pub public_key_pem: Option<String>,
}

impl Default for SigningKeyConfig {
    fn default() -> Self {
        Self {
            kid: "primary".to_string(),
            algorithm: "HS256".to_string(),
            secret: None,
            private_key_pem: None,
            public_key_pem: None,
        }
    }
}

impl fmt::Debug for SigningKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyConfig")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field(
                "private_key_pem",
                &self.private_key_pem.as_ref().map(|_| "<redacted>"),
            )
            .field("public_key_pem", &self.public_key_pem.is_some())
            .finish()
    }
}

impl SigningKeyConfig {
    /// HMAC key from a secret.
    #[must_use]
    pub fn hmac(kid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            algorithm: "HS256".to_string(),
            secret: Some(secret.into()),
            private_key_pem: None,
            public_key_pem: None,
        }
    }

    /// Builds the signing key.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm is unsupported or key material is
    /// missing or invalid.
    pub fn to_key_pair(&self) -> Result<SigningKeyPair, JwtError> {
        let algorithm: SigningAlgorithm = self.algorithm.parse()?;
        if algorithm.is_hmac() {
            let secret = self
                .secret
                .as_deref()
                .ok_or_else(|| JwtError::invalid_key("missing secret"))?;
            SigningKeyPair::from_secret(&self.kid, algorithm, secret.as_bytes())
        } else {
            let private_pem = self
                .private_key_pem
                .as_deref()
                .ok_or_else(|| JwtError::invalid_key("missing private_key_pem"))?;
            let public_pem = self
                .public_key_pem
                .as_deref()
                .ok_or_else(|| JwtError::invalid_key("missing public_key_pem"))?;
            SigningKeyPair::from_pem(&self.kid, algorithm, private_pem, public_pem)
        }
    }

    fn validate(&self, path: &str) -> Result<(), ConfigError> {
        if self.kid.is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "{path}.kid cannot be empty"
            )));
        }

        let algorithm: SigningAlgorithm = self.algorithm.parse().map_err(|_| {
            ConfigError::InvalidValue(format!(
                "Invalid signing algorithm at {path}: '{}'. Must be HS256, HS384, HS512, RS256, RS384, or ES384",
                self.algorithm
            ))
        })?;

        if algorithm.is_hmac() {
            match &self.secret {
                None => return Err(ConfigError::Missing(format!("{path}.secret"))),
                Some(secret) if secret.len() < MIN_SECRET_LEN => {
                    return Err(ConfigError::InvalidValue(format!(
                        "{path}.secret must be at least {MIN_SECRET_LEN} bytes"
                    )));
                }
                Some(_) => {}
            }
        } else {
            if self.private_key_pem.is_none() {
                return Err(ConfigError::Missing(format!("{path}.private_key_pem")));
            }
            if self.public_key_pem.is_none() {
                return Err(ConfigError::Missing(format!("{path}.public_key_pem")));
            }
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl LifecycleConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The issuer is empty
    /// - A TTL, the store timeout, or the cleanup interval is zero
    /// - `access_ttl` is not shorter than `refresh_ttl`
    /// - The distributed backend has no `backend_connection`
    /// - A signing key is incomplete or both keys share a `kid`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }

        if self.access_ttl.is_zero() || self.refresh_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "access_ttl and refresh_ttl must be > 0".to_string(),
            ));
        }

        if self.access_ttl >= self.refresh_ttl {
            return Err(ConfigError::InvalidValue(
                "access_ttl must be shorter than refresh_ttl".to_string(),
            ));
        }

        if self.session_max_age.is_some_and(|age| age.is_zero()) {
            return Err(ConfigError::InvalidValue(
                "session_max_age must be > 0".to_string(),
            ));
        }

        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "store_timeout must be > 0".to_string(),
            ));
        }

        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "cleanup_interval must be > 0".to_string(),
            ));
        }

        if self.backend == BackendKind::Distributed {
            match self.backend_connection.as_deref() {
                None | Some("") => {
                    return Err(ConfigError::Missing("backend_connection".to_string()));
                }
                Some(_) => {}
            }
            if self.redis.pool_size == 0 {
                return Err(ConfigError::InvalidValue(
                    "redis.pool_size must be > 0".to_string(),
                ));
            }
        }

        self.signing.current.validate("signing.current")?;
        if let Some(previous) = &self.signing.previous {
            previous.validate("signing.previous")?;
            if previous.kid == self.signing.current.kid {
                return Err(ConfigError::InvalidValue(
                    "signing.previous.kid must differ from signing.current.kid".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Builds the token codec from the signing configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a key cannot be loaded.
    pub fn build_codec(&self) -> Result<TokenCodec, ConfigError> {
        let current = self
            .signing
            .current
            .to_key_pair()
            .map_err(|e| ConfigError::InvalidValue(format!("signing.current: {e}")))?;
        let mut codec = TokenCodec::new(&self.issuer, current);

        if let Some(previous) = &self.signing.previous {
            let previous = previous
                .to_key_pair()
                .map_err(|e| ConfigError::InvalidValue(format!("signing.previous: {e}")))?;
            codec = codec.with_previous_key(previous, self.signing.previous_key_grace);
        }

        Ok(codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn valid_config() -> LifecycleConfig {
        let mut config = LifecycleConfig::default();
        config.signing.current = SigningKeyConfig::hmac("k1", SECRET);
        config
    }

    #[test]
    fn test_default_lifetimes() {
        let config = LifecycleConfig::default();
        assert_eq!(config.access_ttl, Duration::from_secs(900));
        assert_eq!(config.refresh_ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.store_timeout, Duration::from_millis(300));
        assert_eq!(config.backend, BackendKind::Memory);
    }

    #[test]
    fn test_default_config_requires_secret() {
        let err = LifecycleConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
        assert!(err.to_string().contains("signing.current.secret"));
    }

    #[test]
    fn test_valid_config_validates() {
        assert!(valid_config().validate().is_ok());
        assert!(valid_config().build_codec().is_ok());
    }

    #[test]
    fn test_empty_issuer_fails_validation() {
        let mut config = valid_config();
        config.issuer = String::new();
        assert!(config.validate().unwrap_err().to_string().contains("issuer"));
    }

    #[test]
    fn test_access_ttl_must_be_shorter() {
        let mut config = valid_config();
        config.access_ttl = config.refresh_ttl;
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("access_ttl")
        );
    }

    #[test]
    fn test_distributed_requires_connection() {
        let mut config = valid_config();
        config.backend = BackendKind::Distributed;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref f) if f == "backend_connection"));

        config.backend_connection = Some("redis://localhost:6379".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_short_secret_fails_validation() {
        let mut config = valid_config();
        config.signing.current = SigningKeyConfig::hmac("k1", "short");
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("at least 32 bytes")
        );
    }

    #[test]
    fn test_asymmetric_key_requires_pem() {
        let mut config = valid_config();
        config.signing.current.algorithm = "RS256".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("private_key_pem"));
    }

    #[test]
    fn test_invalid_algorithm_fails_validation() {
        let mut config = valid_config();
        config.signing.current.algorithm = "none".to_string();
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("signing algorithm")
        );
    }

    #[test]
    fn test_previous_key_needs_distinct_kid() {
        let mut config = valid_config();
        config.signing.previous = Some(SigningKeyConfig::hmac("k1", SECRET));
        assert!(config.validate().unwrap_err().to_string().contains("kid"));

        config.signing.previous = Some(SigningKeyConfig::hmac("k0", SECRET));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = SigningKeyConfig::hmac("k1", SECRET);
        let debug = format!("{key:?}");
        assert!(!debug.contains(SECRET));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_humantime_deserialization() {
        let json = serde_json::json!({
            "issuer": "https://auth.example.com",
            "access_ttl": "5m",
            "refresh_ttl": "1day",
            "session_max_age": "30days",
            "backend": "distributed",
            "backend_connection": "redis://cache:6379",
            "store_timeout": "250ms"
        });
        let config: LifecycleConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.access_ttl, Duration::from_secs(300));
        assert_eq!(config.refresh_ttl, Duration::from_secs(86_400));
        assert_eq!(config.session_max_age, Some(Duration::from_secs(30 * 86_400)));
        assert_eq!(config.backend, BackendKind::Distributed);
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        // Unspecified sections keep their defaults
        assert_eq!(config.redis.key_prefix, "sessionward");
    }
}
