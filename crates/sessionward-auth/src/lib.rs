//! # sessionward-auth
//!
//! Session token lifecycle management: issuing, rotating and revoking
//! access/refresh token pairs once a caller's identity is established.
//!
//! This crate provides:
//! - Single-use refresh tokens with atomic rotation
//! - Replay (theft) detection that revokes the whole session family
//! - Stateless signed access tokens with a two-key verification window
//! - An in-memory token store and the storage trait for other backends
//! - A background sweep for stores without native expiry
//!
//! ## Modules
//!
//! - [`config`] - Lifecycle configuration and validation
//! - [`token`] - Access token codec and refresh id generation
//! - [`storage`] - Token store trait and in-memory implementation
//! - [`rotation`] - The refresh token state machine
//! - [`manager`] - Public façade used by the authentication layer
//! - [`cleanup`] - Expired record sweep
//! - [`audit`] - Lifecycle audit events
//! - [`types`] - Records and value types

pub mod audit;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod manager;
pub mod rotation;
pub mod storage;
pub mod token;
pub mod types;

pub use audit::{
    AuditEvent, AuditEventKind, AuditSink, ChannelAuditSink, NoopAuditSink, TracingAuditSink,
};
pub use cleanup::CleanupWorker;
pub use config::{
    BackendKind, ConfigError, LifecycleConfig, RedisOptions, SigningConfig, SigningKeyConfig,
};
pub use error::{ErrorCategory, LifecycleError};
pub use manager::LifecycleManager;
pub use rotation::{RotationEngine, RotationPolicy};
pub use storage::{MemoryTokenStore, StoreError, StoreResult, TokenStore};
pub use token::{
    AccessTokenClaims, JwtError, KeyFamily, KeyPem, SigningAlgorithm, SigningKeyPair, TokenCodec,
    generate_refresh_id,
};
pub use types::{
    RefreshTokenRecord, SessionClaims, SessionInfo, SessionScope, TokenPair, TokenStatus,
    fingerprint,
};

/// Type alias for lifecycle operation results.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use sessionward_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::LifecycleResult;
    pub use crate::audit::{AuditEvent, AuditEventKind, AuditSink, TracingAuditSink};
    pub use crate::config::{BackendKind, ConfigError, LifecycleConfig, SigningKeyConfig};
    pub use crate::error::{ErrorCategory, LifecycleError};
    pub use crate::manager::LifecycleManager;
    pub use crate::storage::{MemoryTokenStore, StoreError, TokenStore};
    pub use crate::token::{AccessTokenClaims, SigningAlgorithm, SigningKeyPair, TokenCodec};
    pub use crate::types::{SessionClaims, SessionInfo, SessionScope, TokenPair, TokenStatus};
}
