//! Worker process supervision.
//!
//! ## Architecture
//!
//! - **WorkerController**: starts an execution unit and hands back its
//!   process and stdio
//! - **Supervisor**: runs the readiness handshake and wires the capability
//!   channels, producing a [`WorkerHandle`]
//! - **WorkerHandle**: owns the process and transport until disposal
//!
//! ```text
//! Spawning ──ready──> Ready ──dispose()──> Terminated
//!     │                 │
//!     └──error/EOF──────┴──transport lost──> Errored
//! ```

mod handshake;
mod spawn;

pub use handshake::establish;
pub use spawn::ProcessController;

use crate::util::{is_process_alive, kill_process};
use async_trait::async_trait;
use parking_lot::RwLock;
use pressbox_shared::{
    Channel, Endpoint, PressboxError, PressboxResult, RemoteHandle, Service,
};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::runtime::SupervisorOptions;

/// Worker method asking it to tear down its guest runtime state.
const DISPOSE_METHOD: &str = "dispose";

/// Unique identifier of one spawned worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(Ulid);

impl WorkerId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    Ready,
    Terminated,
    Errored,
}

/// What a worker is started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLaunch {
    /// Host directory backing the guest filesystem.
    pub site_root: PathBuf,
    /// Bound on the worker's boot. `None` waits indefinitely.
    pub boot_timeout: Option<Duration>,
}

impl WorkerLaunch {
    pub fn new(site_root: impl Into<PathBuf>) -> Self {
        Self {
            site_root: site_root.into(),
            boot_timeout: None,
        }
    }
}

/// Transport halves of a started worker.
pub struct WorkerStdio {
    pub reader: Box<dyn AsyncBufRead + Unpin + Send>,
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
}

/// Starts execution units.
#[async_trait]
pub trait WorkerController: Send + Sync {
    async fn start(
        &self,
        launch: &WorkerLaunch,
    ) -> PressboxResult<(Box<dyn WorkerProcess>, WorkerStdio)>;
}

/// Lifecycle operations on a started unit.
#[async_trait]
pub trait WorkerProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Wait for the unit to exit, up to `limit`. Returns whether it exited.
    async fn wait(&mut self, limit: Option<Duration>) -> bool;

    fn kill(&mut self);
}

/// Spawns workers and completes their handshake.
#[derive(Clone)]
pub struct Supervisor {
    controller: Arc<dyn WorkerController>,
    options: SupervisorOptions,
}

impl Supervisor {
    pub fn new(controller: Arc<dyn WorkerController>, options: SupervisorOptions) -> Self {
        Self {
            controller,
            options,
        }
    }

    /// Spawn a worker and resolve once it signalled readiness.
    ///
    /// `file_lock` is exposed to the worker on the `file_lock` channel right
    /// after the handshake. Fails with `Spawn` if the worker reports an error
    /// or goes away first.
    pub async fn spawn(
        &self,
        launch: &WorkerLaunch,
        file_lock: Arc<dyn Service>,
    ) -> PressboxResult<WorkerHandle> {
        let id = WorkerId::generate();
        let state = Arc::new(RwLock::new(WorkerState::Spawning));
        tracing::info!(worker_id = %id, site_root = %launch.site_root.display(), "Spawning worker");

        let (mut process, stdio) = self.controller.start(launch).await?;

        let endpoint =
            match establish(stdio.reader, stdio.writer, self.options.ready_timeout).await {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    *state.write() = WorkerState::Errored;
                    tracing::error!(worker_id = %id, "Worker failed to start: {}", e);
                    process.kill();
                    let _ = process.wait(self.options.dispose_timeout).await;
                    return Err(match e {
                        PressboxError::Spawn(_) => e,
                        other => PressboxError::Spawn(other.to_string()),
                    });
                }
            };

        endpoint.expose(Channel::FileLock, file_lock);
        *state.write() = WorkerState::Ready;
        tracing::info!(worker_id = %id, worker_pid = process.pid(), "Worker ready");

        let monitor = tokio::spawn(monitor(id, endpoint.clone(), Arc::clone(&state)));

        Ok(WorkerHandle {
            id,
            endpoint,
            state,
            process: tokio::sync::Mutex::new(Some(process)),
            options: self.options.clone(),
            monitor,
        })
    }
}

/// Flip to `Errored` when the transport goes away without a dispose.
async fn monitor(id: WorkerId, endpoint: Endpoint, state: Arc<RwLock<WorkerState>>) {
    let reason = endpoint.closed().await;
    let mut state = state.write();
    if *state == WorkerState::Ready {
        tracing::warn!(worker_id = %id, reason = %reason, "Worker transport lost");
        *state = WorkerState::Errored;
    }
}

/// One spawned worker. Disposing it, or dropping it, ends the process.
pub struct WorkerHandle {
    id: WorkerId,
    endpoint: Endpoint,
    state: Arc<RwLock<WorkerState>>,
    process: tokio::sync::Mutex<Option<Box<dyn WorkerProcess>>>,
    options: SupervisorOptions,
    monitor: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The boot/runtime capability living in the worker.
    pub fn runtime(&self) -> RemoteHandle {
        self.endpoint.remote(Channel::Runtime)
    }

    /// Tear down the guest runtime state, then the transport, then the
    /// process. Idempotent; runs after errors too.
    pub async fn dispose(&self) -> PressboxResult<()> {
        let mut process = self.process.lock().await;
        let Some(mut child) = process.take() else {
            return Ok(());
        };
        tracing::info!(worker_id = %self.id, "Disposing worker");

        if !self.endpoint.is_closed() {
            let runtime = self.runtime();
            let call = runtime.call::<_, Value>(DISPOSE_METHOD, &());
            let result = match self.options.dispose_timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or_else(|_| {
                        Err(PressboxError::Transport(format!(
                            "no dispose reply within {:?}",
                            limit
                        )))
                    }),
                None => call.await,
            };
            if let Err(e) = result {
                tracing::warn!(worker_id = %self.id, "Guest teardown failed: {}", e);
            }
        }

        *self.state.write() = WorkerState::Terminated;
        self.endpoint.close().await;

        if !child.wait(self.options.dispose_timeout).await {
            tracing::warn!(worker_id = %self.id, "Worker did not exit, killing it");
            child.kill();
            let _ = child.wait(self.options.dispose_timeout).await;
        }
        tracing::debug!(worker_id = %self.id, "Worker disposed");
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.monitor.abort();
        if let Some(child) = self.process.get_mut().as_mut()
            && let Some(pid) = child.pid()
            && is_process_alive(pid)
        {
            tracing::warn!(worker_id = %self.id, worker_pid = pid, "Worker dropped without dispose, killing it");
            kill_process(pid);
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
