//! Public entry point for the authentication layer.
//!
//! [`LifecycleManager`] translates requests into rotation engine calls and
//! applies the configured lifetimes. It holds no state of its own; the
//! backend is chosen once, when the store is handed in.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::LifecycleResult;
use crate::audit::{AuditSink, TracingAuditSink};
use crate::cleanup::CleanupWorker;
use crate::config::{BackendKind, ConfigError, LifecycleConfig};
use crate::rotation::{RotationEngine, RotationPolicy};
use crate::storage::{MemoryTokenStore, TokenStore};
use crate::token::{AccessTokenClaims, TokenCodec};
use crate::types::{RefreshTokenRecord, SessionClaims, SessionInfo, SessionScope, TokenPair};

/// Session token lifecycle manager.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct LifecycleManager {
    engine: RotationEngine,
    config: LifecycleConfig,
}

impl LifecycleManager {
    /// Builds a manager over an already selected store.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid or a signing
    /// key cannot be loaded.
    pub fn from_config(
        config: LifecycleConfig,
        store: Arc<dyn TokenStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let codec = Arc::new(config.build_codec()?);
        let engine = RotationEngine::new(store, codec, audit, RotationPolicy::from_config(&config));

        tracing::info!(
            backend = engine.store().backend_name(),
            issuer = %config.issuer,
            kid = %engine.codec().current_kid(),
            "Lifecycle manager initialized"
        );

        Ok(Self { engine, config })
    }

    /// Builds a manager over a fresh in-memory store, auditing to `tracing`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid or selects
    /// another backend.
    pub fn in_memory(config: LifecycleConfig) -> Result<Self, ConfigError> {
        if config.backend != BackendKind::Memory {
            return Err(ConfigError::InvalidValue(format!(
                "backend '{}' cannot run on the in-memory store",
                config.backend
            )));
        }
        let store = Arc::new(MemoryTokenStore::with_tombstone_ttl(config.refresh_ttl));
        Self::from_config(config, store, Arc::new(TracingAuditSink))
    }

    /// Assembles a manager from parts without consulting configuration.
    #[must_use]
    pub fn from_parts(
        store: Arc<dyn TokenStore>,
        codec: Arc<TokenCodec>,
        audit: Arc<dyn AuditSink>,
        policy: RotationPolicy,
    ) -> Self {
        let mut config = LifecycleConfig {
            issuer: codec.issuer().to_string(),
            access_ttl: policy.access_ttl,
            refresh_ttl: policy.refresh_ttl,
            session_max_age: policy.session_max_age,
            store_timeout: policy.store_timeout,
            ..LifecycleConfig::default()
        };
        config.signing.current.kid = codec.current_kid().to_string();
        Self {
            engine: RotationEngine::new(store, codec, audit, policy),
            config,
        }
    }

    /// Returns the configuration the manager was built from.
    ///
    /// Signing secrets are included; do not log it.
    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Returns the underlying rotation engine.
    #[must_use]
    pub fn engine(&self) -> &RotationEngine {
        &self.engine
    }

    /// Name of the active store backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.engine.store().backend_name()
    }

    /// Starts a session for an authenticated user.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    #[tracing::instrument(skip(self, claims))]
    pub async fn issue(&self, user_id: &str, claims: SessionClaims) -> LifecycleResult<TokenPair> {
        self.engine.issue(user_id, claims).await.inspect_err(log_fault)
    }

    /// Exchanges a refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid`, `AuthReplay`, `AuthRevoked` or
    /// `StoreUnavailable`. Callers map all of them to a failed
    /// authentication.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> LifecycleResult<TokenPair> {
        self.engine
            .refresh(refresh_token)
            .await
            .inspect_err(log_fault)
    }

    /// Logs out one session by revoking its current refresh token.
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` or `StoreUnavailable`.
    #[tracing::instrument(skip_all)]
    pub async fn revoke(&self, refresh_token: &str) -> LifecycleResult<()> {
        self.engine
            .revoke(refresh_token)
            .await
            .inspect_err(log_fault)
    }

    /// Revokes every token of one session.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_family(&self, family_id: &str) -> LifecycleResult<u64> {
        self.engine
            .revoke_family(family_id)
            .await
            .inspect_err(log_fault)
    }

    /// Revokes a whole family or every family of a user.
    ///
    /// Unknown users and families succeed with a count of zero.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_all_sessions(&self, scope: SessionScope) -> LifecycleResult<u64> {
        let result = match &scope {
            SessionScope::User(user_id) => self.engine.revoke_user(user_id).await,
            SessionScope::Family(family_id) => self.engine.revoke_family(family_id).await,
        };
        result.inspect_err(log_fault)
    }

    /// Verifies an access token. Pure: no store access.
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` if the token does not verify.
    pub fn verify_access_token(&self, access_token: &str) -> LifecycleResult<AccessTokenClaims> {
        self.engine.verify_access_token(access_token)
    }

    /// Lists the sessions of a user that can still be refreshed.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    pub async fn active_sessions(&self, user_id: &str) -> LifecycleResult<Vec<SessionInfo>> {
        self.engine.active_sessions(user_id).await
    }

    /// Lists the unexpired records of a family, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    pub async fn family_lineage(
        &self,
        family_id: &str,
    ) -> LifecycleResult<Vec<RefreshTokenRecord>> {
        self.engine.family_lineage(family_id).await
    }

    /// Starts the cleanup worker for the configured store.
    ///
    /// Inert when the store has native TTL.
    #[must_use]
    pub fn start_cleanup(&self, cancel: CancellationToken) -> CleanupWorker {
        CleanupWorker::spawn(
            Arc::clone(self.engine.store()),
            self.config.cleanup_interval,
            cancel,
        )
    }
}

fn log_fault(err: &crate::LifecycleError) {
    if !err.is_authentication_error() {
        tracing::error!(
            error = %err,
            category = %err.category(),
            code = err.error_code(),
            "Lifecycle operation failed"
        );
    }
}
