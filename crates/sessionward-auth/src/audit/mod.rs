//! Token lifecycle audit events.
//!
//! The lifecycle manager emits an [`AuditEvent`] for every issue, rotation,
//! revocation and detected replay. Where the events end up is up to the
//! [`AuditSink`] the manager is built with:
//!
//! - [`TracingAuditSink`] - structured log lines on the `sessionward::audit` target
//! - [`ChannelAuditSink`] - forwards to an external consumer over a bounded channel
//! - [`NoopAuditSink`] - discards everything
//!
//! Events never carry a raw refresh token id, only its fingerprint.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// Tracing target for audit events.
pub const AUDIT_TARGET: &str = "sessionward::audit";

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventKind {
    /// A new family was started.
    #[serde(rename = "token.issued")]
    Issued,
    /// A refresh token was consumed and replaced.
    #[serde(rename = "token.rotated")]
    Rotated,
    /// A token or family was revoked.
    #[serde(rename = "token.revoked")]
    Revoked,
    /// A consumed token was presented again.
    #[serde(rename = "token.replay_detected")]
    ReplayDetected,
}

impl AuditEventKind {
    /// Returns the event name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "token.issued",
            Self::Rotated => "token.rotated",
            Self::Revoked => "token.revoked",
            Self::ReplayDetected => "token.replay_detected",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened.
    pub kind: AuditEventKind,

    /// Affected subject, if known (bulk family revocations may not know it).
    pub user_id: Option<String>,

    /// Affected family.
    pub family_id: String,

    /// Fingerprint of the refresh token involved, if any. For rotations this
    /// is the newly minted child.
    pub token_fp: Option<String>,

    /// Fingerprint of the consumed parent of a rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_fp: Option<String>,

    /// When the event occurred.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl AuditEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(kind: AuditEventKind, family_id: impl Into<String>) -> Self {
        Self {
            kind,
            user_id: None,
            family_id: family_id.into(),
            token_fp: None,
            parent_fp: None,
            at: OffsetDateTime::now_utc(),
        }
    }

    /// Sets the subject.
    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the token fingerprint.
    #[must_use]
    pub fn token(mut self, token_fp: impl Into<String>) -> Self {
        self.token_fp = Some(token_fp.into());
        self
    }

    /// Sets the fingerprint of the rotated-away parent.
    #[must_use]
    pub fn parent(mut self, parent_fp: impl Into<String>) -> Self {
        self.parent_fp = Some(parent_fp.into());
        self
    }
}

/// Destination for audit events.
///
/// `record` is called on the request path and must not block on slow
/// consumers.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records one event.
    async fn record(&self, event: AuditEvent);
}

/// Emits events as `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        let user_id = event.user_id.as_deref().unwrap_or("-");
        let token_fp = event.token_fp.as_deref().unwrap_or("-");
        let parent_fp = event.parent_fp.as_deref().unwrap_or("-");
        match event.kind {
            AuditEventKind::ReplayDetected => tracing::error!(
                target: AUDIT_TARGET,
                event = event.kind.as_str(),
                user_id,
                family_id = %event.family_id,
                token_fp,
                "Refresh token replay detected, family revoked"
            ),
            _ => tracing::info!(
                target: AUDIT_TARGET,
                event = event.kind.as_str(),
                user_id,
                family_id = %event.family_id,
                token_fp,
                parent_fp,
                "Token lifecycle event"
            ),
        }
    }
}

/// Forwards events into a bounded `mpsc` channel.
///
/// When the channel is full or closed the event is dropped with a warning.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Creates a sink and the receiving end of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Wraps an existing sender.
    #[must_use]
    pub fn from_sender(tx: mpsc::Sender<AuditEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AuditSink for ChannelAuditSink {
    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(event) => ("channel full", event),
                mpsc::error::TrySendError::Closed(event) => ("channel closed", event),
            };
            tracing::warn!(
                target: AUDIT_TARGET,
                event = event.kind.as_str(),
                family_id = %event.family_id,
                reason,
                "Dropped audit event"
            );
        }
    }
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: AuditEvent) {}
}
