//! Redis implementation of [`TokenStore`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolConfig, Runtime};
use redis::{AsyncCommands, Script};
use sessionward_auth::storage::{StoreError, StoreResult, TokenStore};
use sessionward_auth::{RefreshTokenRecord, TokenStatus, fingerprint};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::scripts;

const FIELD_DATA: &str = "data";
const FIELD_STATUS: &str = "status";
const FIELD_CONSUMED_AT: &str = "consumedAt";
const FIELD_REVOKED_AT: &str = "revokedAt";

/// Key layout under a common prefix.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Creates a key space rooted at `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Prefix shared by all record keys.
    #[must_use]
    pub fn record_prefix(&self) -> String {
        format!("{}:rt:", self.prefix)
    }

    /// Hash holding one refresh token record.
    #[must_use]
    pub fn record(&self, token_id: &str) -> String {
        format!("{}:rt:{token_id}", self.prefix)
    }

    /// List of a family's token ids in issue order.
    #[must_use]
    pub fn family(&self, family_id: &str) -> String {
        format!("{}:family:{family_id}", self.prefix)
    }

    /// Marker set when a family is revoked.
    #[must_use]
    pub fn family_revoked(&self, family_id: &str) -> String {
        format!("{}:family:{family_id}:revoked", self.prefix)
    }

    /// Set of a user's family ids.
    #[must_use]
    pub fn user(&self, user_id: &str) -> String {
        format!("{}:user:{user_id}", self.prefix)
    }
}

/// Distributed token store backed by a Redis connection pool.
///
/// Records expire natively; every conditional write runs as a Lua script,
/// so it is atomic with respect to all other clients.
pub struct RedisTokenStore {
    pool: Pool,
    keys: KeySpace,
    tombstone_ttl: Duration,
    put_script: Script,
    cas_script: Script,
    revoke_family_script: Script,
}

impl RedisTokenStore {
    /// Wraps an existing pool.
    ///
    /// `tombstone_ttl` is how long a revoked-family marker lives; it should
    /// be at least the refresh token lifetime.
    #[must_use]
    pub fn new(pool: Pool, key_prefix: impl Into<String>, tombstone_ttl: Duration) -> Self {
        Self {
            pool,
            keys: KeySpace::new(key_prefix),
            tombstone_ttl,
            put_script: Script::new(scripts::PUT),
            cas_script: Script::new(scripts::COMPARE_AND_SET),
            revoke_family_script: Script::new(scripts::REVOKE_FAMILY),
        }
    }

    /// Creates a pool for `url` and verifies the server answers.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the pool cannot be created or
    /// the server does not answer a `PING`.
    pub async fn connect(
        url: &str,
        pool_size: usize,
        timeout: Duration,
        key_prefix: impl Into<String>,
        tombstone_ttl: Duration,
    ) -> StoreResult<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(url);
        let mut pool_config = PoolConfig::new(pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::unavailable(format!("failed to create Redis pool: {e}")))?;

        let store = Self::new(pool, key_prefix, tombstone_ttl);
        store.ping().await?;
        Ok(store)
    }

    /// Returns the key layout.
    #[must_use]
    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Round-trips a `PING`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the server does not answer.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    async fn conn(&self) -> StoreResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::unavailable(format!("Redis pool: {e}")))
    }

    async fn fetch(
        &self,
        conn: &mut Connection,
        token_id: &str,
    ) -> StoreResult<Option<RefreshTokenRecord>> {
        let fields: HashMap<String, String> = conn
            .hgetall(self.keys.record(token_id))
            .await
            .map_err(redis_error)?;
        if fields.is_empty() {
            return Ok(None);
        }

        let record = decode_record(&fields)?;
        if record.is_expired() {
            return Ok(None);
        }
        Ok(Some(record))
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn put(&self, record: &RefreshTokenRecord, ttl: Duration) -> StoreResult<()> {
        let data = serde_json::to_string(record)?;
        // PEXPIRE 0 would delete the key on the spot.
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let mut conn = self.conn().await?;
        let inserted: i64 = self
            .put_script
            .key(self.keys.record(&record.token_id))
            .key(self.keys.family(&record.family_id))
            .key(self.keys.user(&record.user_id))
            .arg(data)
            .arg(record.status.as_str())
            .arg(ttl_ms)
            .arg(&record.token_id)
            .arg(&record.family_id)
            .arg(self.keys.record_prefix())
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;

        if inserted == 0 {
            return Err(StoreError::already_exists(fingerprint(&record.token_id)));
        }
        Ok(())
    }

    async fn get(&self, token_id: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let mut conn = self.conn().await?;
        self.fetch(&mut conn, token_id).await
    }

    async fn compare_and_set(
        &self,
        token_id: &str,
        expected: TokenStatus,
        new: TokenStatus,
    ) -> StoreResult<bool> {
        let field = match new {
            TokenStatus::Consumed => FIELD_CONSUMED_AT,
            TokenStatus::Revoked => FIELD_REVOKED_AT,
            TokenStatus::Active => "",
        };
        let at = format_timestamp(OffsetDateTime::now_utc())?;

        let mut conn = self.conn().await?;
        let swapped: i64 = self
            .cas_script
            .key(self.keys.record(token_id))
            .arg(expected.as_str())
            .arg(new.as_str())
            .arg(field)
            .arg(at)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(swapped == 1)
    }

    async fn mark_family_revoked(&self, family_id: &str) -> StoreResult<u64> {
        let at = format_timestamp(OffsetDateTime::now_utc())?;
        let marker_ttl_ms = self.tombstone_ttl.as_millis().max(1) as u64;

        let mut conn = self.conn().await?;
        let revoked: i64 = self
            .revoke_family_script
            .key(self.keys.family(family_id))
            .key(self.keys.family_revoked(family_id))
            .arg(self.keys.record_prefix())
            .arg(at)
            .arg(marker_ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(u64::try_from(revoked).unwrap_or(0))
    }

    async fn is_family_revoked(&self, family_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        conn.exists(self.keys.family_revoked(family_id))
            .await
            .map_err(redis_error)
    }

    async fn family_members(&self, family_id: &str) -> StoreResult<Vec<RefreshTokenRecord>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .lrange(self.keys.family(family_id), 0, -1)
            .await
            .map_err(redis_error)?;

        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.fetch(&mut conn, &id).await? {
                members.push(record);
            }
        }
        Ok(members)
    }

    async fn user_families(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut families: Vec<String> = conn
            .smembers(self.keys.user(user_id))
            .await
            .map_err(redis_error)?;
        families.sort();
        Ok(families)
    }

    async fn delete_expired(&self) -> StoreResult<u64> {
        Ok(0)
    }

    fn has_native_ttl(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

fn redis_error(err: redis::RedisError) -> StoreError {
    StoreError::unavailable(format!("Redis: {err}"))
}

fn format_timestamp(at: OffsetDateTime) -> StoreResult<String> {
    at.format(&Rfc3339)
        .map_err(|e| StoreError::serialization(e.to_string()))
}

fn parse_timestamp(
    fields: &HashMap<String, String>,
    name: &str,
) -> StoreResult<Option<OffsetDateTime>> {
    fields
        .get(name)
        .map(|raw| {
            OffsetDateTime::parse(raw, &Rfc3339)
                .map_err(|e| StoreError::corrupt(format!("invalid {name}: {e}")))
        })
        .transpose()
}

/// Rebuilds a record from its hash fields.
fn decode_record(fields: &HashMap<String, String>) -> StoreResult<RefreshTokenRecord> {
    let data = fields
        .get(FIELD_DATA)
        .ok_or_else(|| StoreError::corrupt("record without data"))?;
    let mut record: RefreshTokenRecord = serde_json::from_str(data)?;

    if let Some(status) = fields.get(FIELD_STATUS) {
        record.status = status.parse().map_err(StoreError::corrupt)?;
    }
    if let Some(at) = parse_timestamp(fields, FIELD_CONSUMED_AT)? {
        record.consumed_at = Some(at);
    }
    if let Some(at) = parse_timestamp(fields, FIELD_REVOKED_AT)? {
        record.revoked_at = Some(at);
    }
    Ok(record)
}
