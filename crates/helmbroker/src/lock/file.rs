// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Advisory file lock, one `instance.lock` per instance.

use async_trait::async_trait;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{InstanceLock, LockError, LockGuard, LockHandle};
use crate::store::{LOCK_FILE, validate_instance_id};

/// Local lock backed by `flock(2)` on `{instances_dir}/{id}/instance.lock`.
///
/// The kernel releases the lock when the holding process exits, so a
/// crashed holder never blocks later operations.
#[derive(Debug, Clone)]
pub struct FileLock {
    instances_dir: PathBuf,
}

impl FileLock {
    /// Lock files live under `instances_dir`.
    pub fn new(instances_dir: impl Into<PathBuf>) -> Self {
        Self {
            instances_dir: instances_dir.into(),
        }
    }

    /// Lock file path of an instance.
    pub fn lock_path(&self, instance_id: &str) -> PathBuf {
        self.instances_dir.join(instance_id).join(LOCK_FILE)
    }
}

#[async_trait]
impl InstanceLock for FileLock {
    fn backend_type(&self) -> &'static str {
        "file"
    }

    async fn acquire(&self, instance_id: &str) -> Result<LockHandle, LockError> {
        validate_instance_id(instance_id)
            .map_err(|_| LockError::InvalidName(instance_id.to_string()))?;
        let path = self.lock_path(instance_id);

        let lock = tokio::task::spawn_blocking(move || lock_exclusive(&path))
            .await
            .map_err(|e| LockError::Io(std::io::Error::other(e)))??;

        debug!(
            instance_id = %instance_id,
            path = %self.lock_path(instance_id).display(),
            "Acquired instance lock"
        );
        Ok(LockHandle::new(
            instance_id,
            Box::new(FileGuard { lock: Some(lock) }),
        ))
    }
}

fn lock_exclusive(path: &Path) -> Result<Flock<File>, LockError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_file, errno)| LockError::Io(std::io::Error::from(errno)))
}

/// Dropping the inner `Flock` unlocks the file.
struct FileGuard {
    lock: Option<Flock<File>>,
}

#[async_trait]
impl LockGuard for FileGuard {
    async fn release(self: Box<Self>) -> Result<(), LockError> {
        let mut guard = self;
        if let Some(lock) = guard.lock.take() {
            lock.unlock()
                .map_err(|(_lock, errno)| LockError::Io(std::io::Error::from(errno)))?;
        }
        Ok(())
    }
}
