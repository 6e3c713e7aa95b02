//! Redis backend for sessionward-auth
//!
//! Provides the distributed [`TokenStore`] used when several instances of
//! the authentication layer share sessions, and the startup factory that
//! picks the store from configuration.
//!
//! # Key layout
//!
//! | Key | Type | TTL |
//! |-----|------|-----|
//! | `{prefix}:rt:{token_id}` | hash | remaining record lifetime |
//! | `{prefix}:family:{family_id}` | list of token ids | longest member |
//! | `{prefix}:family:{family_id}:revoked` | string | refresh TTL |
//! | `{prefix}:user:{user_id}` | set of family ids | longest member |
//!
//! # Example
//!
//! ```ignore
//! use sessionward_auth_redis::create_lifecycle_manager;
//!
//! let manager = create_lifecycle_manager(config, Arc::new(TracingAuditSink)).await?;
//! let pair = manager.issue("alice", SessionClaims::default()).await?;
//! ```

mod scripts;
pub mod store;

use std::sync::Arc;

use sessionward_auth::storage::{MemoryTokenStore, StoreError, TokenStore};
use sessionward_auth::{AuditSink, BackendKind, ConfigError, LifecycleConfig, LifecycleManager};

pub use store::{KeySpace, RedisTokenStore};

/// Errors raised while assembling the lifecycle manager at startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configured store could not be reached.
    #[error("Token store unavailable at startup: {0}")]
    Store(#[from] StoreError),
}

/// Creates the token store selected by `config.backend`.
///
/// The distributed backend must answer at startup; there is no fallback to
/// the in-memory store.
///
/// # Errors
///
/// Returns `StartupError::Config` if the distributed backend has no
/// connection string, `StartupError::Store` if Redis cannot be reached.
pub async fn create_token_store(
    config: &LifecycleConfig,
) -> Result<Arc<dyn TokenStore>, StartupError> {
    match config.backend {
        BackendKind::Memory => {
            tracing::info!("Using in-memory token store");
            Ok(Arc::new(MemoryTokenStore::with_tombstone_ttl(
                config.refresh_ttl,
            )))
        }
        BackendKind::Distributed => {
            let url = config
                .backend_connection
                .as_deref()
                .filter(|url| !url.is_empty())
                .ok_or_else(|| ConfigError::Missing("backend_connection".to_string()))?;

            tracing::info!(
                pool_size = config.redis.pool_size,
                key_prefix = %config.redis.key_prefix,
                "Connecting to Redis token store"
            );

            let store = RedisTokenStore::connect(
                url,
                config.redis.pool_size,
                config.store_timeout,
                config.redis.key_prefix.clone(),
                config.refresh_ttl,
            )
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Redis token store unreachable"))?;

            tracing::info!("Connected to Redis token store");
            Ok(Arc::new(store))
        }
    }
}

/// Validates `config`, creates its store and builds the manager.
///
/// # Errors
///
/// Returns `StartupError` if the configuration is invalid or the store
/// cannot be reached.
pub async fn create_lifecycle_manager(
    config: LifecycleConfig,
    audit: Arc<dyn AuditSink>,
) -> Result<LifecycleManager, StartupError> {
    config.validate()?;
    let store = create_token_store(&config).await?;
    Ok(LifecycleManager::from_config(config, store, audit)?)
}
