//! Pressbox worker: the isolated execution unit that boots and serves one
//! guest site.
//!
//! ## Architecture
//!
//! ```text
//! host ──stdin──> Endpoint ──runtime──> WorkerService ──> BootSequencer
//!      <─stdout─           <─file_lock── RemoteFileLock <─┘    │
//!                                                              ├─ ProcessIdAllocator
//!                                                              ├─ apply_mounts
//!                                                              └─ GuestFramework / RuntimeLoader
//! ```
//!
//! The worker announces itself with the readiness frame only after its
//! runtime capability is exposed, so the first host call never races the
//! setup.

pub mod boot;
pub mod guest;
pub mod lock;
pub mod mounts;
pub mod pid;
pub mod pipeline;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use boot::{BootSequencer, BootState, Readiness, SequencerOptions};
pub use lock::{FileLockClient, RemoteFileLock};
pub use mounts::apply_mounts;
pub use pid::ProcessIdAllocator;
pub use service::WorkerService;

use guest::native::{NativeFramework, NativeRuntimeLoader};
use pressbox_shared::{Channel, Endpoint, Frame, PressboxError, PressboxResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite};

/// Settings of one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Host directory backing the guest filesystem view.
    pub site_root: PathBuf,
    pub boot_timeout: Option<Duration>,
}

/// Serve the worker protocol over `reader`/`writer` until the host goes away.
///
/// Setup failures are reported to the host as an error frame in place of
/// the readiness frame, then returned.
pub async fn run_worker<R, W>(reader: R, writer: W, config: WorkerConfig) -> PressboxResult<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let endpoint = Endpoint::start(reader, writer);

    let sequencer = match prepare(&endpoint, &config).await {
        Ok(sequencer) => sequencer,
        Err(e) => {
            tracing::error!("Worker setup failed: {}", e);
            let _ = endpoint.send(Frame::Error {
                message: e.to_string(),
            });
            endpoint.close().await;
            return Err(e);
        }
    };

    endpoint.send(Frame::Ready)?;
    tracing::info!(site_root = %config.site_root.display(), "Worker ready");

    let reason = endpoint.closed().await;
    tracing::info!(reason = %reason, "Transport closed, shutting down");

    sequencer.dispose();
    endpoint.close().await;
    Ok(())
}

async fn prepare(endpoint: &Endpoint, config: &WorkerConfig) -> PressboxResult<Arc<BootSequencer>> {
    tokio::fs::create_dir_all(&config.site_root)
        .await
        .map_err(|e| {
            PressboxError::Storage(format!(
                "cannot create site root {}: {}",
                config.site_root.display(),
                e
            ))
        })?;

    let file_lock = Arc::new(RemoteFileLock::new(endpoint.remote(Channel::FileLock)));
    let sequencer = Arc::new(BootSequencer::new(
        Arc::new(NativeFramework::new(&config.site_root)),
        Arc::new(NativeRuntimeLoader::new(&config.site_root)),
        file_lock,
        SequencerOptions {
            boot_timeout: config.boot_timeout,
        },
    ));

    endpoint.expose(
        Channel::Runtime,
        Arc::new(WorkerService::new(Arc::clone(&sequencer))),
    );
    Ok(sequencer)
}
