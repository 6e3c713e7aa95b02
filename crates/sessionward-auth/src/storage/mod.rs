//! Refresh token storage.
//!
//! This module defines the storage interface the rotation engine runs
//! against, and the in-process implementation used for single-instance
//! deployments.
//!
//! # Implementations
//!
//! - [`MemoryTokenStore`] - mutex-guarded map, swept by the cleanup worker
//! - `sessionward-auth-redis` - distributed backend with native TTL

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::types::{RefreshTokenRecord, TokenStatus};

pub use memory::MemoryTokenStore;

/// Type alias for token store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a token store.
///
/// A missing record is not an error; lookups return `Ok(None)`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// A record with this token id already exists.
    #[error("Token already exists: {token_id}")]
    AlreadyExists {
        /// Fingerprint of the colliding token id.
        token_id: String,
    },

    /// The backend could not be reached.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of the connectivity failure.
        message: String,
    },

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Stored data violates the record invariants.
    #[error("Corrupt record: {message}")]
    Corrupt {
        /// Description of the violation.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(token_id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            token_id: token_id.into(),
        }
    }

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Corrupt` error.
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Returns `true` if this is an `AlreadyExists` error.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns `true` if this is a connectivity failure.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Storage trait for refresh token records.
///
/// All operations are keyed by `token_id`. Implementations must make
/// [`compare_and_set`](TokenStore::compare_and_set) a single indivisible
/// operation: it is the only synchronization point of the rotation engine.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Inserts a brand-new record.
    ///
    /// `ttl` is the remaining lifetime of the record; backends with native
    /// expiry use it directly.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the token id is already
    /// present (first write wins).
    async fn put(&self, record: &RefreshTokenRecord, ttl: Duration) -> StoreResult<()>;

    /// Finds a record by token id.
    ///
    /// Returns `None` for unknown and expired records alike.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn get(&self, token_id: &str) -> StoreResult<Option<RefreshTokenRecord>>;

    /// Atomically transitions a record's status.
    ///
    /// Returns `true` only if the current status equalled `expected` and
    /// was replaced by `new`. Missing and expired records return `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn compare_and_set(
        &self,
        token_id: &str,
        expected: TokenStatus,
        new: TokenStatus,
    ) -> StoreResult<bool>;

    /// Revokes every active record of a family and marks the family revoked.
    ///
    /// Consumed and revoked records keep their terminal status and
    /// timestamps.
    ///
    /// # Returns
    ///
    /// Returns the number of records that transitioned to `revoked`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn mark_family_revoked(&self, family_id: &str) -> StoreResult<u64>;

    /// Returns `true` if the family was revoked and the marker has not expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn is_family_revoked(&self, family_id: &str) -> StoreResult<bool>;

    /// Lists the unexpired records of a family, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn family_members(&self, family_id: &str) -> StoreResult<Vec<RefreshTokenRecord>>;

    /// Lists the family ids known for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn user_families(&self, user_id: &str) -> StoreResult<Vec<String>>;

    /// Removes records past their expiry.
    ///
    /// No-op for backends with native TTL.
    ///
    /// # Returns
    ///
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn delete_expired(&self) -> StoreResult<u64>;

    /// Returns `true` if the backend expires records on its own.
    fn has_native_ttl(&self) -> bool;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}
