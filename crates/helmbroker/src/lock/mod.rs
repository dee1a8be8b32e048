// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-instance mutual exclusion.
//!
//! Every operation that touches an instance runs inside one critical
//! section keyed by the instance id. Two backends implement the same
//! [`InstanceLock`] trait and are selected by [`Config::lock_backend`]:
//!
//! | Backend | Holder crash | Acquire |
//! |---------|--------------|---------|
//! | [`FileLock`] | OS drops the advisory lock | blocks until free |
//! | [`RedisLock`] | token expires after the TTL | retries until the timeout |
//!
//! There is no ordering between different instance ids.

mod file;
mod redis;

pub use file::FileLock;
pub use redis::RedisLock;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{Config, LockBackend};
use crate::error::Error;

/// Lock backend errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was not obtained within the acquire timeout.
    #[error("Timed out after {waited:?} waiting for lock on instance {instance_id}")]
    Timeout {
        /// Contended instance.
        instance_id: String,
        /// How long acquisition was attempted.
        waited: Duration,
    },

    /// The lock was lost before it was released (expired or taken over).
    #[error("Lock on instance {instance_id} expired before release")]
    Expired {
        /// Instance whose lock was lost.
        instance_id: String,
    },

    /// Lock file could not be opened or locked.
    #[error("Lock file error: {0}")]
    Io(#[from] std::io::Error),

    /// Lock service error.
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Instance id is not a usable lock name.
    #[error("Invalid lock name: {0}")]
    InvalidName(String),
}

/// Backend-specific ownership of an acquired lock.
#[async_trait]
pub trait LockGuard: Send {
    /// Give up ownership.
    async fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// Acquires exclusive ownership of an instance id.
#[async_trait]
pub trait InstanceLock: Send + Sync {
    /// Backend name for logs.
    fn backend_type(&self) -> &'static str;

    /// Wait for exclusive ownership of `instance_id`.
    async fn acquire(&self, instance_id: &str) -> Result<LockHandle, LockError>;
}

/// An acquired lock.
///
/// Dropping an unreleased handle drops the backend guard, which gives the
/// lock back on a best-effort basis.
pub struct LockHandle {
    instance_id: String,
    guard: Option<Box<dyn LockGuard>>,
}

impl LockHandle {
    /// Wrap a backend guard.
    pub fn new(instance_id: impl Into<String>, guard: Box<dyn LockGuard>) -> Self {
        Self {
            instance_id: instance_id.into(),
            guard: Some(guard),
        }
    }

    /// Locked instance.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Whether the handle still owns the lock.
    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }

    /// Release the lock. Releasing an already released handle is a no-op.
    pub async fn release(&mut self) -> Result<(), LockError> {
        match self.guard.take() {
            Some(guard) => {
                guard.release().await?;
                debug!(instance_id = %self.instance_id, "Released instance lock");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("instance_id", &self.instance_id)
            .field("held", &self.is_held())
            .finish()
    }
}

/// Build the backend selected by the configuration.
pub async fn from_config(config: &Config) -> Result<Arc<dyn InstanceLock>, LockError> {
    match &config.lock_backend {
        LockBackend::File => Ok(Arc::new(FileLock::new(&config.instances_dir))),
        LockBackend::Redis { url } => Ok(Arc::new(
            RedisLock::connect(url, config.lock_timing.clone()).await?,
        )),
    }
}

/// Run `body` while holding the lock on `instance_id`.
///
/// The lock is released on every exit path. A release failure is reported
/// as [`Error::LockRelease`] even when `body` succeeded, and carries the
/// body's own error text when both failed.
pub async fn with_instance_lock<T, F, Fut>(
    lock: &dyn InstanceLock,
    instance_id: &str,
    body: F,
) -> crate::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let mut handle = lock.acquire(instance_id).await?;
    let result = body().await;

    match handle.release().await {
        Ok(()) => result,
        Err(source) => {
            warn!(
                instance_id = %instance_id,
                backend = lock.backend_type(),
                error = %source,
                "Failed to release instance lock"
            );
            Err(Error::LockRelease {
                instance_id: instance_id.to_string(),
                source,
                operation_error: result.err().map(|e| e.to_string()),
            })
        }
    }
}
