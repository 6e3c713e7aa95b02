//! Refresh token record.
//!
//! This module defines the persisted refresh token structure and its
//! status lifecycle.
//!
//! # Security
//!
//! - The token id is a bearer credential; logs and audit events only ever
//!   carry its [`fingerprint`](RefreshTokenRecord::fingerprint)
//! - `consumed` and `revoked` are absorbing states
//! - Expired records are treated as absent

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Status of a refresh token record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    /// Usable exactly once.
    Active,
    /// Rotated away by a successful refresh.
    Consumed,
    /// Invalidated by logout or theft response.
    Revoked,
}

impl TokenStatus {
    /// Returns the status as stored.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Consumed => "consumed",
            Self::Revoked => "revoked",
        }
    }

    /// Returns `true` for the absorbing states.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "consumed" => Ok(Self::Consumed),
            "revoked" => Ok(Self::Revoked),
            other => Err(format!("unknown token status '{other}'")),
        }
    }
}

/// Claims carried into every access token of a session.
///
/// Captured at `issue` time and preserved across rotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Caller role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Additional application claims.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionClaims {
    /// Creates claims with a role.
    #[must_use]
    pub fn with_role(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            extra: serde_json::Map::new(),
        }
    }

    /// Adds an application claim.
    #[must_use]
    pub fn claim(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Refresh token record stored in the token store.
///
/// One record exists per issued refresh token. Records sharing a
/// `family_id` descend from the same login and form a single parent chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRecord {
    /// Opaque random identifier, used as the store key.
    pub token_id: String,

    /// Owning subject.
    pub user_id: String,

    /// Lineage identifier, stable across rotations.
    pub family_id: String,

    /// Token this one replaced (None for the first token of a family).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Current status.
    pub status: TokenStatus,

    /// Claims reissued into every access token of the family.
    #[serde(default)]
    pub claims: SessionClaims,

    /// When the family was started by `issue`.
    #[serde(with = "time::serde::rfc3339")]
    pub family_issued_at: OffsetDateTime,

    /// When this record was created.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// When this record stops being usable.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// When this record was rotated away.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub consumed_at: Option<OffsetDateTime>,

    /// When this record was revoked.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub revoked_at: Option<OffsetDateTime>,
}

impl RefreshTokenRecord {
    /// Returns `true` if this record has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if this record has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Returns `true` if the record can still be rotated.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status == TokenStatus::Active && !self.is_expired()
    }

    /// Applies a status transition, stamping the matching timestamp.
    pub fn transition(&mut self, status: TokenStatus, at: OffsetDateTime) {
        self.status = status;
        match status {
            TokenStatus::Consumed => self.consumed_at = Some(at),
            TokenStatus::Revoked => self.revoked_at = Some(at),
            TokenStatus::Active => {}
        }
    }

    /// Returns this record's token fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.token_id)
    }
}

/// Short SHA-256 fingerprint of a token id, safe for logs and audit events.
#[must_use]
pub fn fingerprint(token_id: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(token_id.as_bytes());
    hex::encode(&digest[..8])
}
