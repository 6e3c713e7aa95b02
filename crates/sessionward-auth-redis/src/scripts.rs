//! Lua scripts executed atomically by Redis.
//!
//! Each record is a hash with the serialized record in `data` and the
//! mutable fields (`status`, `consumedAt`, `revokedAt`) kept alongside, so
//! status transitions never rewrite the JSON.
//!
//! The family revocation script touches record keys it derives from the
//! family list. That is fine on a single Redis instance but not in cluster
//! mode.

/// Inserts a record if absent and indexes it under its family and user.
///
/// Ids whose record key has expired are dropped from the family list first,
/// so the list only ever holds live members.
///
/// KEYS: record, family list, user set.
/// ARGV: data, status, ttl (ms), token id, family id, record key prefix.
/// Returns 1 on insert, 0 if the record already exists.
pub(crate) const PUT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
local ttl = tonumber(ARGV[3])
for _, id in ipairs(redis.call('LRANGE', KEYS[2], 0, -1)) do
  if redis.call('EXISTS', ARGV[6] .. id) == 0 then
    redis.call('LREM', KEYS[2], 0, id)
  end
end
redis.call('HSET', KEYS[1], 'data', ARGV[1], 'status', ARGV[2])
redis.call('PEXPIRE', KEYS[1], ttl)
redis.call('RPUSH', KEYS[2], ARGV[4])
redis.call('SADD', KEYS[3], ARGV[5])
for i = 2, 3 do
  if redis.call('PTTL', KEYS[i]) < ttl then
    redis.call('PEXPIRE', KEYS[i], ttl)
  end
end
return 1
";

/// Transitions the status of a record if it matches the expected one.
///
/// KEYS: record.
/// ARGV: expected status, new status, timestamp field ('' for none), timestamp.
/// Returns 1 if the status was replaced, 0 otherwise.
pub(crate) const COMPARE_AND_SET: &str = r"
if redis.call('HGET', KEYS[1], 'status') ~= ARGV[1] then
  return 0
end
if ARGV[3] == '' then
  redis.call('HSET', KEYS[1], 'status', ARGV[2])
else
  redis.call('HSET', KEYS[1], 'status', ARGV[2], ARGV[3], ARGV[4])
end
return 1
";

/// Revokes the active members of a family and writes the family marker.
///
/// KEYS: family list, family marker.
/// ARGV: record key prefix, timestamp, marker ttl (ms).
/// Returns the number of records revoked.
pub(crate) const REVOKE_FAMILY: &str = r"
local ids = redis.call('LRANGE', KEYS[1], 0, -1)
local revoked = 0
for _, id in ipairs(ids) do
  local key = ARGV[1] .. id
  if redis.call('HGET', key, 'status') == 'active' then
    redis.call('HSET', key, 'status', 'revoked', 'revokedAt', ARGV[2])
    revoked = revoked + 1
  end
end
redis.call('SET', KEYS[2], ARGV[2], 'PX', ARGV[3])
return revoked
";
