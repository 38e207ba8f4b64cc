//! Cooldown Store (C2)
//!
//! Per-sender block/cooldown flags with TTL, plus the hour-bucket
//! coalescing hash that deduplicates `(replyFrom, to)` pairs within an
//! hour. Backed by a Redis-style KV store (`GET/SET EX`, `HSETNX`,
//! `HGETALL`, `HDEL`, `EXPIRE`).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::errors::{AppError, AppResult};
use crate::models::{
    block_key, cooldown_key, hour_bucket_key, sender_of_field, BatchEntry, BLOCK_TTL_SECONDS,
    BUCKET_TTL_SECONDS, COOLDOWN_TTL_SECONDS,
};
#[cfg(test)]
use crate::models::hour_bucket_index;

/// Port onto the per-sender flag store and hour-bucket coalescing hash.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    async fn mark_blocked(&self, addr: &str) -> AppResult<()>;
    async fn is_blocked(&self, addr: &str) -> AppResult<bool>;
    #[allow(dead_code)]
    async fn clear_blocked(&self, addr: &str) -> AppResult<()>;
    async fn mark_cooldown(&self, addr: &str) -> AppResult<()>;
    async fn is_in_cooldown(&self, addr: &str) -> AppResult<bool>;

    /// Insert `entry` into the bucket for the hour containing `now_ms`,
    /// keyed by `dedup_field(reply_from, entry.to)`. Returns `false`
    /// (without error) if the field already existed — the caller must
    /// still drop the queue message in that case.
    async fn add_to_bucket(&self, reply_from: &str, entry: &BatchEntry, now_ms: i64) -> AppResult<bool>;

    /// Read every field of the current hour's bucket, regrouped by sender.
    async fn read_bucket(&self, now_ms: i64) -> AppResult<HashMap<String, Vec<BatchEntry>>>;

    /// Delete every field belonging to the given senders from the current
    /// hour's bucket.
    async fn remove_senders(&self, now_ms: i64, senders: &[String]) -> AppResult<()>;
}

fn now_epoch_string() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis().to_string()
}

/// Redis-backed `CooldownStore`.
pub struct RedisCooldownStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisCooldownStore {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Internal(format!("invalid redis URL: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::Transient(format!("failed to connect to redis: {e}")))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CooldownStore for RedisCooldownStore {
    async fn mark_blocked(&self, addr: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(block_key(addr), now_epoch_string(), BLOCK_TTL_SECONDS as u64)
            .await
            .map_err(|e| AppError::Transient(format!("markBlocked failed: {e}")))
    }

    async fn is_blocked(&self, addr: &str) -> AppResult<bool> {
        let mut conn = self.manager.clone();
        conn.exists(block_key(addr))
            .await
            .map_err(|e| AppError::Transient(format!("isBlocked failed: {e}")))
    }

    async fn clear_blocked(&self, addr: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(block_key(addr))
            .await
            .map_err(|e| AppError::Transient(format!("clearBlocked failed: {e}")))
    }

    async fn mark_cooldown(&self, addr: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(cooldown_key(addr), now_epoch_string(), COOLDOWN_TTL_SECONDS as u64)
            .await
            .map_err(|e| AppError::Transient(format!("markCooldown failed: {e}")))
    }

    async fn is_in_cooldown(&self, addr: &str) -> AppResult<bool> {
        let mut conn = self.manager.clone();
        conn.exists(cooldown_key(addr))
            .await
            .map_err(|e| AppError::Transient(format!("isInCooldown failed: {e}")))
    }

    async fn add_to_bucket(&self, reply_from: &str, entry: &BatchEntry, now_ms: i64) -> AppResult<bool> {
        let mut conn = self.manager.clone();
        let key = hour_bucket_key(now_ms);
        let field = crate::models::dedup_field(reply_from, &entry.request.to);
        let value = entry.to_json()?;

        let inserted: bool = conn
            .hset_nx(&key, &field, value)
            .await
            .map_err(|e| AppError::Transient(format!("addToBucket failed: {e}")))?;

        // Refresh the bucket TTL from the last write, per the invariant in
        // spec §4.2. Best-effort: a failed refresh doesn't undo the insert.
        let _: Result<(), redis::RedisError> = conn.expire(&key, BUCKET_TTL_SECONDS).await;

        Ok(inserted)
    }

    async fn read_bucket(&self, now_ms: i64) -> AppResult<HashMap<String, Vec<BatchEntry>>> {
        let mut conn = self.manager.clone();
        let key = hour_bucket_key(now_ms);
        let fields: HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(|e| AppError::Transient(format!("readBucket failed: {e}")))?;

        let mut grouped: HashMap<String, Vec<BatchEntry>> = HashMap::new();
        for (field, raw) in fields {
            let Some(sender) = sender_of_field(&field) else {
                tracing::warn!(field, "bucket field missing dedup separator, skipping");
                continue;
            };
            match BatchEntry::from_json(&raw) {
                Ok(entry) => grouped.entry(sender.to_string()).or_default().push(entry),
                Err(e) => tracing::warn!(field, error = %e, "failed to decode bucket entry, skipping"),
            }
        }
        Ok(grouped)
    }

    async fn remove_senders(&self, now_ms: i64, senders: &[String]) -> AppResult<()> {
        if senders.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let key = hour_bucket_key(now_ms);
        let all_fields: Vec<String> = conn
            .hkeys(&key)
            .await
            .map_err(|e| AppError::Transient(format!("removeSenders hkeys failed: {e}")))?;

        let to_delete: Vec<String> = all_fields
            .into_iter()
            .filter(|field| {
                sender_of_field(field)
                    .map(|s| senders.iter().any(|sender| sender == s))
                    .unwrap_or(false)
            })
            .collect();

        if to_delete.is_empty() {
            return Ok(());
        }
        conn.hdel::<_, _, ()>(&key, to_delete)
            .await
            .map_err(|e| AppError::Transient(format!("removeSenders hdel failed: {e}")))
    }
}

/// An in-memory stand-in used to test the ingest/batch tick state
/// machines without a live Redis instance. Shared by this module's own
/// tests and by `ingest`/`batch`'s tick tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeCooldownStore {
        pub blocked: Mutex<std::collections::HashSet<String>>,
        pub cooldown: Mutex<std::collections::HashSet<String>>,
        pub buckets: Mutex<HashMap<i64, HashMap<String, BatchEntry>>>,
    }

    #[async_trait]
    impl CooldownStore for FakeCooldownStore {
        async fn mark_blocked(&self, addr: &str) -> AppResult<()> {
            self.blocked.lock().unwrap().insert(addr.to_string());
            Ok(())
        }
        async fn is_blocked(&self, addr: &str) -> AppResult<bool> {
            Ok(self.blocked.lock().unwrap().contains(addr))
        }
        async fn clear_blocked(&self, addr: &str) -> AppResult<()> {
            self.blocked.lock().unwrap().remove(addr);
            Ok(())
        }
        async fn mark_cooldown(&self, addr: &str) -> AppResult<()> {
            self.cooldown.lock().unwrap().insert(addr.to_string());
            Ok(())
        }
        async fn is_in_cooldown(&self, addr: &str) -> AppResult<bool> {
            Ok(self.cooldown.lock().unwrap().contains(addr))
        }
        async fn add_to_bucket(&self, reply_from: &str, entry: &BatchEntry, now_ms: i64) -> AppResult<bool> {
            let hour = hour_bucket_index(now_ms);
            let field = crate::models::dedup_field(reply_from, &entry.request.to);
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets.entry(hour).or_default();
            if bucket.contains_key(&field) {
                Ok(false)
            } else {
                bucket.insert(field, entry.clone());
                Ok(true)
            }
        }
        async fn read_bucket(&self, now_ms: i64) -> AppResult<HashMap<String, Vec<BatchEntry>>> {
            let hour = hour_bucket_index(now_ms);
            let buckets = self.buckets.lock().unwrap();
            let mut grouped: HashMap<String, Vec<BatchEntry>> = HashMap::new();
            if let Some(bucket) = buckets.get(&hour) {
                for (field, entry) in bucket {
                    if let Some(sender) = sender_of_field(field) {
                        grouped.entry(sender.to_string()).or_default().push(entry.clone());
                    }
                }
            }
            Ok(grouped)
        }
        async fn remove_senders(&self, now_ms: i64, senders: &[String]) -> AppResult<()> {
            let hour = hour_bucket_index(now_ms);
            let mut buckets = self.buckets.lock().unwrap();
            if let Some(bucket) = buckets.get_mut(&hour) {
                bucket.retain(|field, _| {
                    sender_of_field(field)
                        .map(|s| !senders.iter().any(|sender| sender == s))
                        .unwrap_or(true)
                });
            }
            Ok(())
        }
    }
}
