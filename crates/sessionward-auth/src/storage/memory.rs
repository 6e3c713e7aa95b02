//! In-process token store.
//!
//! Single-instance fallback. All state lives behind one mutex, which is
//! held only for the duration of a single operation and never across an
//! await point. Expired records stay in memory until the cleanup worker
//! sweeps them, but are invisible to every read.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;

use super::{StoreError, StoreResult, TokenStore};
use crate::types::{RefreshTokenRecord, TokenStatus, fingerprint};

/// Default lifetime of a revoked-family marker.
const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Default)]
struct Inner {
    records: HashMap<String, RefreshTokenRecord>,
    /// family_id -> token ids in insertion order
    families: HashMap<String, Vec<String>>,
    /// user_id -> family ids
    users: HashMap<String, HashSet<String>>,
    /// family_id -> marker expiry
    revoked_families: HashMap<String, OffsetDateTime>,
}

impl Inner {
    fn live(&self, token_id: &str, now: OffsetDateTime) -> Option<&RefreshTokenRecord> {
        self.records
            .get(token_id)
            .filter(|record| !record.is_expired_at(now))
    }
}

/// Mutex-guarded in-memory implementation of [`TokenStore`].
pub struct MemoryTokenStore {
    inner: Mutex<Inner>,
    tombstone_ttl: Duration,
}

impl MemoryTokenStore {
    /// Creates an empty store with the default revoked-family marker lifetime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tombstone_ttl(DEFAULT_TOMBSTONE_TTL)
    }

    /// Creates an empty store whose revoked-family markers live for `ttl`.
    ///
    /// `ttl` should be at least the refresh token lifetime.
    #[must_use]
    pub fn with_tombstone_ttl(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            tombstone_ttl: ttl,
        }
    }

    /// Number of records currently held, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Returns `true` if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, record: &RefreshTokenRecord, _ttl: Duration) -> StoreResult<()> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.lock();

        // An expired leftover with the same id does not block the insert.
        if inner.live(&record.token_id, now).is_some() {
            return Err(StoreError::already_exists(fingerprint(&record.token_id)));
        }

        inner
            .records
            .insert(record.token_id.clone(), record.clone());
        let members = inner.families.entry(record.family_id.clone()).or_default();
        if !members.contains(&record.token_id) {
            members.push(record.token_id.clone());
        }
        inner
            .users
            .entry(record.user_id.clone())
            .or_default()
            .insert(record.family_id.clone());
        Ok(())
    }

    async fn get(&self, token_id: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let now = OffsetDateTime::now_utc();
        Ok(self.inner.lock().live(token_id, now).cloned())
    }

    async fn compare_and_set(
        &self,
        token_id: &str,
        expected: TokenStatus,
        new: TokenStatus,
    ) -> StoreResult<bool> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.lock();
        match inner.records.get_mut(token_id) {
            Some(record) if !record.is_expired_at(now) && record.status == expected => {
                record.transition(new, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_family_revoked(&self, family_id: &str) -> StoreResult<u64> {
        let now = OffsetDateTime::now_utc();
        let marker_until = now + self.tombstone_ttl;
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let mut revoked = 0;
        if let Some(members) = inner.families.get(family_id) {
            for token_id in members {
                if let Some(record) = inner.records.get_mut(token_id)
                    && record.status == TokenStatus::Active
                {
                    record.transition(TokenStatus::Revoked, now);
                    revoked += 1;
                }
            }
        }
        inner
            .revoked_families
            .insert(family_id.to_string(), marker_until);
        Ok(revoked)
    }

    async fn is_family_revoked(&self, family_id: &str) -> StoreResult<bool> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .inner
            .lock()
            .revoked_families
            .get(family_id)
            .is_some_and(|until| now < *until))
    }

    async fn family_members(&self, family_id: &str) -> StoreResult<Vec<RefreshTokenRecord>> {
        let now = OffsetDateTime::now_utc();
        let inner = self.inner.lock();
        let members = inner
            .families
            .get(family_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.live(id, now).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(members)
    }

    async fn user_families(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock();
        let mut families: Vec<String> = inner
            .users
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        families.sort();
        Ok(families)
    }

    async fn delete_expired(&self) -> StoreResult<u64> {
        let now = OffsetDateTime::now_utc();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let before = inner.records.len();
        inner.records.retain(|_, record| !record.is_expired_at(now));
        let removed = (before - inner.records.len()) as u64;

        let records = &inner.records;
        inner.families.retain(|_, members| {
            members.retain(|id| records.contains_key(id));
            !members.is_empty()
        });
        let families = &inner.families;
        inner.users.retain(|_, set| {
            set.retain(|family_id| families.contains_key(family_id));
            !set.is_empty()
        });
        inner.revoked_families.retain(|_, until| now < *until);

        Ok(removed)
    }

    fn has_native_ttl(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionClaims;

    fn record(token_id: &str, family_id: &str, ttl: time::Duration) -> RefreshTokenRecord {
        let now = OffsetDateTime::now_utc();
        RefreshTokenRecord {
            token_id: token_id.to_string(),
            user_id: "alice".to_string(),
            family_id: family_id.to_string(),
            parent_id: None,
            status: TokenStatus::Active,
            claims: SessionClaims::default(),
            family_issued_at: now,
            issued_at: now,
            expires_at: now + ttl,
            consumed_at: None,
            revoked_at: None,
        }
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_put_is_first_write_wins() {
        let store = MemoryTokenStore::new();
        let rec = record("t1", "f1", time::Duration::minutes(1));

        store.put(&rec, TTL).await.unwrap();
        let err = store.put(&rec, TTL).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_get_unknown_is_none() {
        let store = MemoryTokenStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_record_reads_as_absent() {
        let store = MemoryTokenStore::new();
        let rec = record("t1", "f1", time::Duration::seconds(-1));
        store.put(&rec, TTL).await.unwrap();

        assert!(store.get("t1").await.unwrap().is_none());
        assert!(
            !store
                .compare_and_set("t1", TokenStatus::Active, TokenStatus::Consumed)
                .await
                .unwrap()
        );
        assert!(store.family_members("f1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_set_single_winner() {
        let store = MemoryTokenStore::new();
        store
            .put(&record("t1", "f1", time::Duration::minutes(1)), TTL)
            .await
            .unwrap();

        assert!(
            store
                .compare_and_set("t1", TokenStatus::Active, TokenStatus::Consumed)
                .await
                .unwrap()
        );
        assert!(
            !store
                .compare_and_set("t1", TokenStatus::Active, TokenStatus::Consumed)
                .await
                .unwrap()
        );

        let rec = store.get("t1").await.unwrap().unwrap();
        assert_eq!(rec.status, TokenStatus::Consumed);
        assert!(rec.consumed_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_family_revoked_preserves_terminal_records() {
        let store = MemoryTokenStore::new();
        store
            .put(&record("t1", "f1", time::Duration::minutes(1)), TTL)
            .await
            .unwrap();
        store
            .put(&record("t2", "f1", time::Duration::minutes(1)), TTL)
            .await
            .unwrap();
        store
            .put(&record("other", "f2", time::Duration::minutes(1)), TTL)
            .await
            .unwrap();
        store
            .compare_and_set("t1", TokenStatus::Active, TokenStatus::Consumed)
            .await
            .unwrap();

        let revoked = store.mark_family_revoked("f1").await.unwrap();
        assert_eq!(revoked, 1);

        let t1 = store.get("t1").await.unwrap().unwrap();
        assert_eq!(t1.status, TokenStatus::Consumed);
        assert!(t1.revoked_at.is_none());
        assert_eq!(
            store.get("t2").await.unwrap().unwrap().status,
            TokenStatus::Revoked
        );
        assert_eq!(
            store.get("other").await.unwrap().unwrap().status,
            TokenStatus::Active
        );
        assert!(store.is_family_revoked("f1").await.unwrap());
        assert!(!store.is_family_revoked("f2").await.unwrap());
    }

    #[tokio::test]
    async fn test_family_members_in_insertion_order() {
        let store = MemoryTokenStore::new();
        for id in ["a", "b", "c"] {
            store
                .put(&record(id, "f1", time::Duration::minutes(1)), TTL)
                .await
                .unwrap();
        }
        let ids: Vec<String> = store
            .family_members("f1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.token_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.user_families("alice").await.unwrap(), vec!["f1"]);
    }

    #[tokio::test]
    async fn test_delete_expired_prunes_indexes() {
        let store = MemoryTokenStore::with_tombstone_ttl(Duration::from_millis(10));
        store
            .put(&record("old", "f-old", time::Duration::seconds(-1)), TTL)
            .await
            .unwrap();
        store
            .put(&record("new", "f-new", time::Duration::minutes(1)), TTL)
            .await
            .unwrap();
        store.mark_family_revoked("f-old").await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.delete_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.user_families("alice").await.unwrap(), vec!["f-new"]);
        assert!(!store.is_family_revoked("f-old").await.unwrap());
        assert_eq!(store.delete_expired().await.unwrap(), 0);
    }

    #[test]
    fn test_backend_traits() {
        let store = MemoryTokenStore::default();
        assert!(!store.has_native_ttl());
        assert_eq!(store.backend_name(), "memory");
        assert!(store.is_empty());
    }
}
