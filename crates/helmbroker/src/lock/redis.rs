// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Distributed lock on a shared Redis.
//!
//! Acquire is `SET key token NX PX ttl`, retried every `retry_interval`
//! until `acquire_timeout`. Release deletes the key only while it still
//! holds our token, so a holder whose lock already expired cannot remove
//! a lock someone else took over.

use ::redis::aio::ConnectionManager;
use ::redis::{Client, Script};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{InstanceLock, LockError, LockGuard, LockHandle};
use crate::config::LockTiming;

const KEY_PREFIX: &str = "helmbroker:lock:instance:";

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock tokens with expiry on a shared Redis.
#[derive(Clone)]
pub struct RedisLock {
    conn: ConnectionManager,
    timing: LockTiming,
}

impl RedisLock {
    /// Connect to the lock service.
    pub async fn connect(url: &str, timing: LockTiming) -> Result<Self, LockError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, timing })
    }

    /// Key holding the owner token for an instance.
    pub fn lock_key(instance_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, instance_id)
    }

    async fn try_set(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let ttl_ms = self.timing.ttl.as_millis() as u64;
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl InstanceLock for RedisLock {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn acquire(&self, instance_id: &str) -> Result<LockHandle, LockError> {
        if instance_id.is_empty() {
            return Err(LockError::InvalidName(instance_id.to_string()));
        }
        let key = Self::lock_key(instance_id);
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();

        loop {
            if self.try_set(&key, &token).await? {
                debug!(
                    instance_id = %instance_id,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Acquired instance lock"
                );
                let guard = RedisGuard {
                    conn: self.conn.clone(),
                    instance_id: instance_id.to_string(),
                    key,
                    token,
                    released: false,
                };
                return Ok(LockHandle::new(instance_id, Box::new(guard)));
            }

            let waited = started.elapsed();
            if waited >= self.timing.acquire_timeout {
                warn!(instance_id = %instance_id, waited_ms = waited.as_millis() as u64, "Instance lock acquire timed out");
                return Err(LockError::Timeout {
                    instance_id: instance_id.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(self.timing.retry_interval).await;
        }
    }
}

struct RedisGuard {
    conn: ConnectionManager,
    instance_id: String,
    key: String,
    token: String,
    released: bool,
}

async fn delete_if_owner(
    mut conn: ConnectionManager,
    key: &str,
    token: &str,
) -> Result<bool, LockError> {
    let deleted: i64 = Script::new(RELEASE_SCRIPT)
        .key(key)
        .arg(token)
        .invoke_async(&mut conn)
        .await?;
    Ok(deleted == 1)
}

#[async_trait]
impl LockGuard for RedisGuard {
    async fn release(self: Box<Self>) -> Result<(), LockError> {
        let mut guard = self;
        guard.released = true;
        if delete_if_owner(guard.conn.clone(), &guard.key, &guard.token).await? {
            Ok(())
        } else {
            Err(LockError::Expired {
                instance_id: guard.instance_id.clone(),
            })
        }
    }
}

impl Drop for RedisGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Without a runtime the token is left to expire.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(instance_id = %self.instance_id, "Instance lock dropped outside runtime, left to expire");
            return;
        };
        let conn = self.conn.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        let instance_id = std::mem::take(&mut self.instance_id);
        runtime.spawn(async move {
            if let Err(e) = delete_if_owner(conn, &key, &token).await {
                warn!(instance_id = %instance_id, error = %e, "Failed to release dropped instance lock");
            }
        });
    }
}
