//! Refresh token rotation engine.
//!
//! The engine owns the refresh token state machine:
//!
//! ```text
//! active ──refresh──▶ consumed
//!   │
//!   └──revoke / family revoke──▶ revoked
//! ```
//!
//! `consumed` and `revoked` are absorbing. The store's
//! `compare_and_set(active → consumed)` is the only synchronization point:
//! of any number of concurrent refreshes presenting the same token, exactly
//! one wins the transition and every other caller observes `consumed` and
//! is treated as a replay.
//!
//! # Security
//!
//! - A replayed token revokes its whole family before the error is returned
//! - Every store call is bounded by `store_timeout`; a timeout fails closed
//! - Raw refresh token ids are never logged

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::LifecycleResult;
use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::config::LifecycleConfig;
use crate::error::LifecycleError;
use crate::storage::{StoreError, StoreResult, TokenStore};
use crate::token::{
    AccessTokenClaims, TokenCodec, generate_refresh_id, is_well_formed_refresh_id,
};
use crate::types::{
    RefreshTokenRecord, SessionClaims, SessionInfo, TokenPair, TokenStatus, fingerprint,
};

/// Attempts at allocating an unused refresh token id before giving up.
const MAX_ID_ATTEMPTS: usize = 3;

/// Lifetimes and limits applied by the engine.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    /// Access token lifetime.
    pub access_ttl: Duration,
    /// Refresh token lifetime, renewed on every rotation.
    pub refresh_ttl: Duration,
    /// Absolute session lifetime.
    pub session_max_age: Option<Duration>,
    /// Upper bound on a single store call.
    pub store_timeout: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::from_config(&LifecycleConfig::default())
    }
}

impl RotationPolicy {
    /// Extracts the policy from a lifecycle configuration.
    #[must_use]
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self {
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            session_max_age: config.session_max_age,
            store_timeout: config.store_timeout,
        }
    }

    /// Expiry of a refresh token issued at `now` in a family started at
    /// `family_issued_at`.
    fn expiry(&self, family_issued_at: OffsetDateTime, now: OffsetDateTime) -> OffsetDateTime {
        let sliding = now + self.refresh_ttl;
        match self.session_max_age {
            Some(max_age) => sliding.min(family_issued_at + max_age),
            None => sliding,
        }
    }
}

/// The refresh token state machine.
pub struct RotationEngine {
    store: Arc<dyn TokenStore>,
    codec: Arc<TokenCodec>,
    audit: Arc<dyn AuditSink>,
    policy: RotationPolicy,
}

impl RotationEngine {
    /// Creates a new rotation engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn TokenStore>,
        codec: Arc<TokenCodec>,
        audit: Arc<dyn AuditSink>,
        policy: RotationPolicy,
    ) -> Self {
        Self {
            store,
            codec,
            audit,
            policy,
        }
    }

    /// Returns the token store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Returns the token codec.
    #[must_use]
    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// Returns the engine policy.
    #[must_use]
    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Starts a new family for `user_id` and returns its first token pair.
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` for an empty `user_id`, `StoreUnavailable` if the
    /// store cannot be reached, `Internal` if no unused token id could be
    /// allocated or signing fails.
    pub async fn issue(&self, user_id: &str, claims: SessionClaims) -> LifecycleResult<TokenPair> {
        if user_id.is_empty() {
            tracing::debug!("Issue rejected for empty user_id");
            return Err(LifecycleError::AuthInvalid);
        }

        let now = OffsetDateTime::now_utc();
        let record = RefreshTokenRecord {
            token_id: String::new(),
            user_id: user_id.to_string(),
            family_id: Uuid::new_v4().to_string(),
            parent_id: None,
            status: TokenStatus::Active,
            claims,
            family_issued_at: now,
            issued_at: now,
            expires_at: self.policy.expiry(now, now),
            consumed_at: None,
            revoked_at: None,
        };

        let record = self.insert_with_fresh_id(record, now).await?;
        let pair = self.token_pair(&record, now)?;

        self.audit
            .record(
                AuditEvent::new(AuditEventKind::Issued, &record.family_id)
                    .user(&record.user_id)
                    .token(record.fingerprint()),
            )
            .await;

        Ok(pair)
    }

    /// Consumes `presented` and returns the next token pair of its family.
    ///
    /// # Errors
    ///
    /// - `AuthInvalid` if the token is malformed, unknown, or expired
    /// - `AuthReplay` if the token was already consumed (the family is
    ///   revoked before returning)
    /// - `AuthRevoked` if the token or its family was revoked
    /// - `StoreUnavailable` if the store failed or timed out, including a
    ///   failed family revocation after a replay
    pub async fn refresh(&self, presented: &str) -> LifecycleResult<TokenPair> {
        if !is_well_formed_refresh_id(presented) {
            tracing::debug!("Refresh with malformed token");
            return Err(LifecycleError::AuthInvalid);
        }
        let token_fp = fingerprint(presented);

        let record = match self.timed("get", self.store.get(presented)).await? {
            Some(record) if !record.is_expired() => record,
            _ => {
                tracing::debug!(token_fp = %token_fp, "Refresh with unknown or expired token");
                return Err(LifecycleError::AuthInvalid);
            }
        };

        match record.status {
            TokenStatus::Consumed => return Err(self.on_replay(&record).await),
            TokenStatus::Revoked => {
                tracing::debug!(family_id = %record.family_id, "Refresh with revoked token");
                return Err(LifecycleError::AuthRevoked);
            }
            TokenStatus::Active => {}
        }

        // Catches a child minted concurrently with a family revocation.
        if self
            .timed(
                "is_family_revoked",
                self.store.is_family_revoked(&record.family_id),
            )
            .await?
        {
            let revoked = self
                .timed(
                    "compare_and_set",
                    self.store
                        .compare_and_set(presented, TokenStatus::Active, TokenStatus::Revoked),
                )
                .await?;
            if revoked {
                tracing::info!(
                    family_id = %record.family_id,
                    token_fp = %token_fp,
                    "Revoked straggler token of a revoked family"
                );
                return Err(LifecycleError::AuthRevoked);
            }
            return Err(self.classify_lost_transition(presented).await);
        }

        let won = self
            .timed(
                "compare_and_set",
                self.store
                    .compare_and_set(presented, TokenStatus::Active, TokenStatus::Consumed),
            )
            .await?;
        if !won {
            return Err(self.classify_lost_transition(presented).await);
        }

        let now = OffsetDateTime::now_utc();
        let expires_at = self.policy.expiry(record.family_issued_at, now);
        if expires_at <= now {
            tracing::info!(
                user_id = %record.user_id,
                family_id = %record.family_id,
                "Session reached its maximum age"
            );
            return Err(LifecycleError::AuthInvalid);
        }

        let child = RefreshTokenRecord {
            token_id: String::new(),
            user_id: record.user_id.clone(),
            family_id: record.family_id.clone(),
            parent_id: Some(record.token_id.clone()),
            status: TokenStatus::Active,
            claims: record.claims.clone(),
            family_issued_at: record.family_issued_at,
            issued_at: now,
            expires_at,
            consumed_at: None,
            revoked_at: None,
        };

        let child = self.insert_with_fresh_id(child, now).await.inspect_err(|e| {
            // The parent is already consumed; the session cannot continue.
            tracing::error!(
                family_id = %record.family_id,
                error = %e,
                "Failed to store rotated refresh token"
            );
        })?;
        let pair = self.token_pair(&child, now)?;

        self.audit
            .record(
                AuditEvent::new(AuditEventKind::Rotated, &child.family_id)
                    .user(&child.user_id)
                    .token(child.fingerprint())
                    .parent(token_fp),
            )
            .await;

        Ok(pair)
    }

    /// Revokes a single refresh token.
    ///
    /// Revoking an already consumed or revoked token succeeds without
    /// changing it.
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` for malformed, unknown or expired tokens and
    /// `StoreUnavailable` if the store failed.
    pub async fn revoke(&self, token: &str) -> LifecycleResult<()> {
        if !is_well_formed_refresh_id(token) {
            return Err(LifecycleError::AuthInvalid);
        }

        let Some(record) = self.timed("get", self.store.get(token)).await? else {
            return Err(LifecycleError::AuthInvalid);
        };

        if record.status.is_terminal() {
            tracing::debug!(
                family_id = %record.family_id,
                status = %record.status,
                "Revoke of a terminal token is a no-op"
            );
            return Ok(());
        }

        let changed = self
            .timed(
                "compare_and_set",
                self.store
                    .compare_and_set(token, TokenStatus::Active, TokenStatus::Revoked),
            )
            .await?;

        if changed {
            self.audit
                .record(
                    AuditEvent::new(AuditEventKind::Revoked, &record.family_id)
                        .user(&record.user_id)
                        .token(record.fingerprint()),
                )
                .await;
        }
        Ok(())
    }

    /// Revokes every token of a family.
    ///
    /// # Returns
    ///
    /// Returns the number of records that were still active.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    pub async fn revoke_family(&self, family_id: &str) -> LifecycleResult<u64> {
        self.revoke_family_of(family_id, None).await
    }

    /// Revokes every family of a user.
    ///
    /// # Returns
    ///
    /// Returns the number of records that were still active.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    pub async fn revoke_user(&self, user_id: &str) -> LifecycleResult<u64> {
        let families = self
            .timed("user_families", self.store.user_families(user_id))
            .await?;

        let mut revoked = 0;
        for family_id in &families {
            revoked += self.revoke_family_of(family_id, Some(user_id)).await?;
        }

        tracing::info!(
            user_id = %user_id,
            families = families.len(),
            revoked,
            "Revoked all sessions of user"
        );
        Ok(revoked)
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
        Ok(self
            .timed("family_members", self.store.family_members(family_id))
            .await?)
    }

    /// Lists the sessions of a user that can still be refreshed.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the store failed.
    pub async fn active_sessions(&self, user_id: &str) -> LifecycleResult<Vec<SessionInfo>> {
        let families = self
            .timed("user_families", self.store.user_families(user_id))
            .await?;

        let mut sessions = Vec::new();
        for family_id in families {
            if self
                .timed("is_family_revoked", self.store.is_family_revoked(&family_id))
                .await?
            {
                continue;
            }
            let members = self
                .timed("family_members", self.store.family_members(&family_id))
                .await?;
            if let Some(head) = members.iter().rev().find(|r| r.is_usable()) {
                sessions.push(SessionInfo::from_head(head, members.len()));
            }
        }

        sessions.sort_by_key(|s| s.started_at);
        Ok(sessions)
    }

    /// Verifies an access token without touching the store.
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` for any token that fails verification.
    pub fn verify_access_token(&self, token: &str) -> LifecycleResult<AccessTokenClaims> {
        self.codec.verify_access_token(token).map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            LifecycleError::AuthInvalid
        })
    }

    /// The audit event names the family's owner and its newest token.
    async fn revoke_family_of(
        &self,
        family_id: &str,
        user_id: Option<&str>,
    ) -> LifecycleResult<u64> {
        let members = self
            .timed("family_members", self.store.family_members(family_id))
            .await?;
        let revoked = self
            .timed("mark_family_revoked", self.store.mark_family_revoked(family_id))
            .await?;

        let mut event = AuditEvent::new(AuditEventKind::Revoked, family_id);
        if let Some(user_id) = user_id.or(members.first().map(|r| r.user_id.as_str())) {
            event = event.user(user_id);
        }
        if let Some(head) = members.last() {
            event = event.token(head.fingerprint());
        }
        self.audit.record(event).await;

        tracing::debug!(family_id = %family_id, revoked, "Family revoked");
        Ok(revoked)
    }

    /// Replay response: revoke the family, then report.
    ///
    /// A failed revocation is returned as a store error so the replay is
    /// neither audited nor answered until the family is actually revoked.
    async fn on_replay(&self, record: &RefreshTokenRecord) -> LifecycleError {
        match self
            .timed(
                "mark_family_revoked",
                self.store.mark_family_revoked(&record.family_id),
            )
            .await
        {
            Ok(revoked) => tracing::warn!(
                user_id = %record.user_id,
                family_id = %record.family_id,
                revoked,
                "Consumed refresh token presented again, family revoked"
            ),
            Err(e) => {
                tracing::error!(
                    user_id = %record.user_id,
                    family_id = %record.family_id,
                    error = %e,
                    "Failed to revoke family after replay"
                );
                return e.into();
            }
        }

        self.audit
            .record(
                AuditEvent::new(AuditEventKind::ReplayDetected, &record.family_id)
                    .user(&record.user_id)
                    .token(record.fingerprint()),
            )
            .await;

        LifecycleError::replay(&record.family_id)
    }

    /// Decides the outcome for a caller whose transition out of `active` failed.
    async fn classify_lost_transition(&self, token_id: &str) -> LifecycleError {
        match self.timed("get", self.store.get(token_id)).await {
            Ok(Some(record)) => match record.status {
                TokenStatus::Consumed => self.on_replay(&record).await,
                TokenStatus::Revoked => LifecycleError::AuthRevoked,
                TokenStatus::Active => {
                    tracing::error!(
                        family_id = %record.family_id,
                        "Token still active after a failed status transition"
                    );
                    LifecycleError::store_unavailable("inconsistent token status")
                }
            },
            Ok(None) => LifecycleError::AuthInvalid,
            Err(e) => e.into(),
        }
    }

    /// Stores `record` under a freshly generated token id.
    async fn insert_with_fresh_id(
        &self,
        mut record: RefreshTokenRecord,
        now: OffsetDateTime,
    ) -> LifecycleResult<RefreshTokenRecord> {
        let ttl = remaining(record.expires_at, now);

        for attempt in 1..=MAX_ID_ATTEMPTS {
            record.token_id = generate_refresh_id();
            match self.timed("put", self.store.put(&record, ttl)).await {
                Ok(()) => return Ok(record),
                Err(e) if e.is_already_exists() => {
                    tracing::warn!(attempt, "Refresh token id collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LifecycleError::internal(
            "could not allocate an unused refresh token id",
        ))
    }

    fn token_pair(
        &self,
        record: &RefreshTokenRecord,
        now: OffsetDateTime,
    ) -> LifecycleResult<TokenPair> {
        let (access_token, _) = self
            .codec
            .issue_access_token(
                &record.user_id,
                &record.family_id,
                &record.claims,
                self.policy.access_ttl,
            )
            .map_err(|e| LifecycleError::internal(format!("Failed to encode access token: {e}")))?;

        Ok(TokenPair {
            access_token,
            refresh_token: record.token_id.clone(),
            token_type: "Bearer".to_string(),
            expires_in: self.policy.access_ttl.as_secs(),
            refresh_expires_in: remaining(record.expires_at, now).as_secs(),
            family_id: record.family_id.clone(),
        })
    }

    /// Bounds a store call by `store_timeout`.
    async fn timed<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.policy.store_timeout, call).await {
            Ok(result) => result.inspect_err(|e| {
                if e.is_unavailable() {
                    tracing::warn!(
                        backend = self.store.backend_name(),
                        operation,
                        error = %e,
                        "Token store call failed"
                    );
                }
            }),
            Err(_) => {
                tracing::warn!(
                    backend = self.store.backend_name(),
                    operation,
                    timeout_ms = self.policy.store_timeout.as_millis() as u64,
                    "Token store call timed out"
                );
                Err(StoreError::unavailable(format!(
                    "{operation} timed out after {:?}",
                    self.policy.store_timeout
                )))
            }
        }
    }
}

fn remaining(expires_at: OffsetDateTime, now: OffsetDateTime) -> Duration {
    Duration::try_from(expires_at - now).unwrap_or(Duration::ZERO)
}
