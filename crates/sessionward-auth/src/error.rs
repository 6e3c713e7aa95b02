//! Lifecycle error types.
//!
//! Every failure of the public lifecycle operations is one of these kinds.
//! Malformed or unknown tokens are never faults: they surface as
//! [`LifecycleError::AuthInvalid`].

use std::fmt;

use crate::storage::StoreError;

/// Errors returned by the lifecycle operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    /// The token is unknown, expired, or malformed.
    #[error("Invalid token")]
    AuthInvalid,

    /// An already-consumed refresh token was presented again.
    ///
    /// The family has been revoked by the time this error is returned.
    #[error("Refresh token replay detected for family {family_id}")]
    AuthReplay {
        /// Family that was revoked in response.
        family_id: String,
    },

    /// The token belongs to a revoked session or family.
    #[error("Token revoked")]
    AuthRevoked,

    /// The token store could not be reached or did not answer in time.
    #[error("Token store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the infrastructure fault.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl LifecycleError {
    /// Creates a new `AuthReplay` error.
    #[must_use]
    pub fn replay(family_id: impl Into<String>) -> Self {
        Self::AuthReplay {
            family_id: family_id.into(),
        }
    }

    /// Creates a new `StoreUnavailable` error.
    #[must_use]
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a replay detection.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::AuthReplay { .. })
    }

    /// Returns `true` if the caller should treat this as a failed authentication.
    #[must_use]
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            Self::AuthInvalid
                | Self::AuthReplay { .. }
                | Self::AuthRevoked
                | Self::StoreUnavailable { .. }
        )
    }

    /// Returns `true` if this is an infrastructure fault the caller may retry.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthInvalid => ErrorCategory::Authentication,
            Self::AuthReplay { .. } => ErrorCategory::Security,
            Self::AuthRevoked => ErrorCategory::Authentication,
            Self::StoreUnavailable { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns a stable machine-readable code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AuthInvalid => "auth_invalid",
            Self::AuthReplay { .. } => "auth_replay",
            Self::AuthRevoked => "auth_revoked",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Returns the HTTP status an authentication layer should answer with.
    ///
    /// All authentication kinds, including an unreachable store, fail
    /// closed as 401.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        if self.is_authentication_error() {
            401
        } else {
            500
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { message } => Self::StoreUnavailable { message },
            StoreError::AlreadyExists { token_id: _ } => {
                Self::internal("refresh token id collision")
            }
            StoreError::Serialization { message } | StoreError::Corrupt { message } => {
                Self::Internal { message }
            }
        }
    }
}

/// Categories of lifecycle errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Ordinary failed authentication.
    Authentication,
    /// Security-significant events (replay).
    Security,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Security => write!(f, "security"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(LifecycleError::AuthInvalid.to_string(), "Invalid token");
        assert_eq!(
            LifecycleError::replay("fam-1").to_string(),
            "Refresh token replay detected for family fam-1"
        );
        assert_eq!(
            LifecycleError::store_unavailable("timed out").to_string(),
            "Token store unavailable: timed out"
        );
    }

    #[test]
    fn test_all_auth_kinds_fail_closed_as_401() {
        for err in [
            LifecycleError::AuthInvalid,
            LifecycleError::replay("f"),
            LifecycleError::AuthRevoked,
            LifecycleError::store_unavailable("down"),
        ] {
            assert!(err.is_authentication_error());
            assert_eq!(err.status_code(), 401);
        }
        assert_eq!(LifecycleError::internal("boom").status_code(), 500);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            LifecycleError::replay("f").category(),
            ErrorCategory::Security
        );
        assert_eq!(
            LifecycleError::AuthInvalid.category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            LifecycleError::store_unavailable("x").category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(ErrorCategory::Security.to_string(), "security");
    }

    #[test]
    fn test_from_store_error() {
        let err: LifecycleError = StoreError::unavailable("connection refused").into();
        assert!(err.is_infrastructure());

        let err: LifecycleError = StoreError::corrupt("bad status").into();
        assert!(matches!(err, LifecycleError::Internal { .. }));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(LifecycleError::AuthRevoked.error_code(), "auth_revoked");
        assert_eq!(LifecycleError::replay("f").error_code(), "auth_replay");
    }
}
