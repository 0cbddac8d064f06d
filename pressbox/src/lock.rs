//! Host-side file-lock coordinator.
//!
//! Locks are advisory `flock(2)` locks, so they hold across every process
//! sharing a directory, not only across the workers of this host. Each
//! acquisition opens its own file description, which makes two holders in
//! the same process contend exactly like two separate processes.

use async_trait::async_trait;
use parking_lot::Mutex;
use pressbox_shared::{
    LockRequest, PressboxError, PressboxResult, Service, UnlockRequest,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod methods {
    pub const IS_CONNECTED: &str = "is_connected";
    pub const LOCK_FILE: &str = "lock_file";
    pub const UNLOCK_FILE: &str = "unlock_file";
}

/// A held lock. Released when dropped.
#[derive(Debug)]
pub struct FileLockGuard {
    path: PathBuf,
    _file: File,
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Identifies the holder of locks taken through [`FileLockManager::lock`].
pub type LockOwner = u64;

/// Lock table for locks requested over the transport, keyed by holder.
#[derive(Debug, Default)]
pub struct FileLockManager {
    held: Mutex<HashMap<LockOwner, HashMap<PathBuf, Vec<FileLockGuard>>>>,
    next_owner: AtomicU64,
}

impl FileLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh holder identity, e.g. one per connected worker.
    pub fn register_owner(&self) -> LockOwner {
        self.next_owner.fetch_add(1, Ordering::Relaxed)
    }

    /// Block until the lock on `path` is granted. The file is created if
    /// needed.
    pub async fn acquire(&self, path: &Path, exclusive: bool) -> PressboxResult<FileLockGuard> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || lock_blocking(path, exclusive))
            .await
            .map_err(|e| PressboxError::Internal(format!("lock task failed: {}", e)))?
    }

    /// Acquire and keep the lock for `owner` until [`unlock`](Self::unlock)
    /// or [`release_owner`](Self::release_owner).
    pub async fn lock(&self, owner: LockOwner, path: &Path, exclusive: bool) -> PressboxResult<()> {
        let guard = self.acquire(path, exclusive).await?;
        tracing::debug!(owner, path = %path.display(), exclusive, "Lock granted");
        self.held
            .lock()
            .entry(owner)
            .or_default()
            .entry(path.to_path_buf())
            .or_default()
            .push(guard);
        Ok(())
    }

    /// Release one lock `owner` holds on `path`.
    pub fn unlock(&self, owner: LockOwner, path: &Path) -> PressboxResult<()> {
        let mut held = self.held.lock();
        let paths = held.get_mut(&owner);
        let guards = paths
            .and_then(|paths| paths.get_mut(path))
            .ok_or_else(|| {
                PressboxError::InvalidState(format!("no lock held on {}", path.display()))
            })?;
        guards.pop();
        if guards.is_empty()
            && let Some(paths) = held.get_mut(&owner)
        {
            paths.remove(path);
            if paths.is_empty() {
                held.remove(&owner);
            }
        }
        tracing::debug!(owner, path = %path.display(), "Lock released");
        Ok(())
    }

    /// Release every lock `owner` still holds. Returns how many were held.
    pub fn release_owner(&self, owner: LockOwner) -> usize {
        let Some(paths) = self.held.lock().remove(&owner) else {
            return 0;
        };
        let released: usize = paths.values().map(Vec::len).sum();
        if released > 0 {
            tracing::info!(owner, released, "Released locks left behind by a lock holder");
        }
        released
    }

    /// Number of locks currently held through [`lock`](Self::lock).
    pub fn held_count(&self) -> usize {
        self.held
            .lock()
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }
}

fn lock_blocking(path: PathBuf, exclusive: bool) -> PressboxResult<FileLockGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| {
            PressboxError::Storage(format!("cannot open lock file {}: {}", path.display(), e))
        })?;

    let operation = if exclusive {
        libc::LOCK_EX
    } else {
        libc::LOCK_SH
    };
    loop {
        if unsafe { libc::flock(file.as_raw_fd(), operation) } == 0 {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(PressboxError::Storage(format!(
                "flock on {} failed: {}",
                path.display(),
                err
            )));
        }
    }

    Ok(FileLockGuard { path, _file: file })
}

/// The lock coordinator exposed to a worker on the `file_lock` channel.
///
/// Every service is its own lock holder. Locks it still holds are released
/// when it is dropped, which happens once the worker's transport closes.
pub struct FileLockService {
    manager: Arc<FileLockManager>,
    owner: LockOwner,
}

impl FileLockService {
    pub fn new(manager: Arc<FileLockManager>) -> Self {
        let owner = manager.register_owner();
        Self { manager, owner }
    }
}

impl Drop for FileLockService {
    fn drop(&mut self) {
        self.manager.release_owner(self.owner);
    }
}

fn params<T: DeserializeOwned>(method: &str, value: Value) -> PressboxResult<T> {
    serde_json::from_value(value)
        .map_err(|e| PressboxError::Config(format!("invalid parameters for {}: {}", method, e)))
}

#[async_trait]
impl Service for FileLockService {
    async fn call(&self, method: &str, value: Value) -> PressboxResult<Value> {
        match method {
            methods::IS_CONNECTED => Ok(Value::Bool(true)),
            methods::LOCK_FILE => {
                let request: LockRequest = params(method, value)?;
                self.manager
                    .lock(self.owner, &request.path, request.exclusive)
                    .await?;
                Ok(Value::Null)
            }
            methods::UNLOCK_FILE => {
                let request: UnlockRequest = params(method, value)?;
                self.manager.unlock(self.owner, &request.path)?;
                Ok(Value::Null)
            }
            other => Err(PressboxError::Unsupported(format!(
                "file lock method '{}'",
                other
            ))),
        }
    }
}
