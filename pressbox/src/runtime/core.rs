//! Host runtime: layout, logging, download cache and lock coordinator shared
//! by every playground started from this process.

use super::layout::FilesystemLayout;
use super::options::{PlaygroundOptions, PressboxOptions};
use crate::download::{CachedDownloader, HttpFetcher};
use crate::lock::FileLockManager;
use crate::playground::Playground;
use crate::supervisor::{ProcessController, Supervisor};
use crate::util::{find_binary, init_logging_for};
use pressbox_shared::constants::env;
use pressbox_shared::{PressboxError, PressboxResult};
use std::sync::{Arc, OnceLock};

const WORKER_BINARY: &str = "pressbox-worker";

/// Process-wide default runtime, created on first use.
static DEFAULT_RUNTIME: OnceLock<PressboxRuntime> = OnceLock::new();

/// Entry point for booting playgrounds. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PressboxRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    options: PressboxOptions,
    layout: FilesystemLayout,
    locks: Arc<FileLockManager>,
    downloader: CachedDownloader,
}

impl PressboxRuntime {
    /// Prepare the home directory, logging and download cache.
    pub fn new(options: PressboxOptions) -> PressboxResult<Self> {
        if !options.home_dir.is_absolute() {
            return Err(PressboxError::Config(format!(
                "home_dir must be an absolute path, got: {}",
                options.home_dir.display()
            )));
        }

        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare().map_err(|e| {
            PressboxError::Storage(format!(
                "failed to initialize {}: {}",
                layout.home_dir().display(),
                e
            ))
        })?;

        init_logging_for(&layout)?;

        let locks = Arc::new(FileLockManager::new());
        let downloader = CachedDownloader::new(layout.cache_dir(), Arc::new(HttpFetcher::new()?))
            .with_locks(Arc::clone(&locks), layout.locks_dir());

        tracing::debug!(home_dir = %layout.home_dir().display(), "Initialized runtime");

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                options,
                layout,
                locks,
                downloader,
            }),
        })
    }

    pub fn with_defaults() -> PressboxResult<Self> {
        Self::new(PressboxOptions::default())
    }

    /// The process-wide runtime, created with default options on first call.
    pub fn default_runtime() -> PressboxResult<&'static Self> {
        if let Some(runtime) = DEFAULT_RUNTIME.get() {
            return Ok(runtime);
        }
        let runtime = Self::with_defaults()?;
        Ok(DEFAULT_RUNTIME.get_or_init(|| runtime))
    }

    /// Install custom options for the process-wide runtime. Fails once the
    /// default runtime exists.
    pub fn init_default_runtime(options: PressboxOptions) -> PressboxResult<()> {
        let runtime = Self::new(options)?;
        DEFAULT_RUNTIME.set(runtime).map_err(|_| {
            PressboxError::InvalidState(
                "default runtime already initialized; call init_default_runtime() first".into(),
            )
        })
    }

    pub fn options(&self) -> &PressboxOptions {
        &self.inner.options
    }

    pub fn layout(&self) -> &FilesystemLayout {
        &self.inner.layout
    }

    pub fn downloader(&self) -> &CachedDownloader {
        &self.inner.downloader
    }

    pub fn file_locks(&self) -> Arc<FileLockManager> {
        Arc::clone(&self.inner.locks)
    }

    /// Supervisor spawning the worker binary.
    pub fn supervisor(&self) -> PressboxResult<Supervisor> {
        let binary = match &self.inner.options.worker_binary {
            Some(path) => path.clone(),
            None => find_binary(WORKER_BINARY, env::WORKER_PATH)?,
        };
        tracing::debug!(binary = %binary.display(), "Using worker binary");
        Ok(Supervisor::new(
            Arc::new(ProcessController::new(binary)),
            self.inner.options.supervisor.clone(),
        ))
    }

    /// Spawn a worker and boot a playground in it.
    pub async fn boot_playground(&self, options: PlaygroundOptions) -> PressboxResult<Playground> {
        let supervisor = self.supervisor()?;
        Playground::boot(self, &supervisor, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_home_is_rejected() {
        let options = PressboxOptions {
            home_dir: "relative/home".into(),
            ..Default::default()
        };
        assert!(matches!(
            PressboxRuntime::new(options),
            Err(PressboxError::Config(_))
        ));
    }

    #[test]
    fn test_new_prepares_layout() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = PressboxRuntime::new(PressboxOptions {
            home_dir: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();

        assert!(runtime.layout().cache_dir().is_dir());
        assert!(runtime.layout().locks_dir().is_dir());
        assert_eq!(runtime.downloader().cache_dir(), dir.path().join("cache"));
    }

    #[test]
    fn test_explicit_worker_binary_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = PressboxRuntime::new(PressboxOptions {
            home_dir: dir.path().to_path_buf(),
            worker_binary: Some(dir.path().join("worker")),
            ..Default::default()
        })
        .unwrap();
        assert!(runtime.supervisor().is_ok());
    }
}
