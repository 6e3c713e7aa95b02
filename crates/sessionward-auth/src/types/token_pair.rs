//! Values returned to the authentication layer.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::refresh_token::RefreshTokenRecord;

/// An access/refresh token pair handed to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Signed, self-contained access token.
    pub access_token: String,

    /// Opaque, single-use refresh token.
    pub refresh_token: String,

    /// Always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Refresh token lifetime in seconds.
    pub refresh_expires_in: u64,

    /// Session (family) the pair belongs to.
    pub family_id: String,
}

/// Target of a bulk revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionScope {
    /// Every family owned by a user ("log out all devices").
    User(String),
    /// A single family (one login session across its rotations).
    Family(String),
}

/// Summary of one live session of a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session (family) identifier.
    pub family_id: String,

    /// When the session was started.
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,

    /// When the current refresh token was issued.
    #[serde(with = "time::serde::rfc3339")]
    pub last_rotated_at: OffsetDateTime,

    /// When the current refresh token expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Number of refresh tokens issued in this session so far.
    pub rotations: usize,
}

impl SessionInfo {
    /// Builds a summary from the active head of a family and its size.
    #[must_use]
    pub fn from_head(head: &RefreshTokenRecord, family_size: usize) -> Self {
        Self {
            family_id: head.family_id.clone(),
            started_at: head.family_issued_at,
            last_rotated_at: head.issued_at,
            expires_at: head.expires_at,
            rotations: family_size.saturating_sub(1),
        }
    }
}
