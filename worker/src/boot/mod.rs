//! Runtime boot sequencer.
//!
//! ```text
//! NotBooted ──boot()──> Booting ──┬──> Ready
//!                                 └──> Failed
//! ```
//!
//! `boot` is accepted once per sequencer. Anything after the first call is
//! rejected with `AlreadyBooted` and leaves the state untouched. Ready and
//! Failed are terminal.
//!
//! The boot itself runs as a staged pipeline, see [`tasks`].

mod ca;
mod tasks;

use crate::guest::{GuestFramework, GuestRuntime, RuntimeLoader, SiteHandler};
use crate::lock::FileLockClient;
use crate::pid::ProcessIdAllocator;
use crate::pipeline::PipelineExecutor;
use parking_lot::Mutex;
use pressbox_shared::{BootParameters, HttpRequest, HttpResponse, PressboxError, PressboxResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use tasks::{BootPipelineContext, boot_plan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    NotBooted,
    Booting,
    Ready,
    Failed,
}

/// Readiness signal observed by the remote caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct SequencerOptions {
    /// Upper bound on one boot. `None` waits indefinitely.
    pub boot_timeout: Option<Duration>,
}

struct BootedSite {
    site: Arc<dyn SiteHandler>,
    primary: Arc<dyn GuestRuntime>,
}

struct Signals {
    state: Mutex<BootState>,
    readiness: watch::Sender<Readiness>,
}

impl Signals {
    fn fail(&self, message: String) {
        *self.state.lock() = BootState::Failed;
        self.readiness.send_replace(Readiness::Failed(message));
    }

    fn ready(&self) {
        *self.state.lock() = BootState::Ready;
        self.readiness.send_replace(Readiness::Ready);
    }
}

/// RAII guard failing the boot if it is dropped while still in progress.
///
/// Covers a boot future dropped mid-way, which would otherwise leave the
/// sequencer in `Booting` forever.
struct BootGuard {
    signals: Arc<Signals>,
    armed: bool,
}

impl BootGuard {
    fn new(signals: Arc<Signals>) -> Self {
        Self {
            signals,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for BootGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!("Boot abandoned before completion");
        self.signals.fail("boot aborted before completion".into());
    }
}

/// Boots the guest application exactly once and serves it afterwards.
pub struct BootSequencer {
    framework: Arc<dyn GuestFramework>,
    loader: Arc<dyn RuntimeLoader>,
    file_lock: Arc<dyn FileLockClient>,
    options: SequencerOptions,
    signals: Arc<Signals>,
    booted: Mutex<Option<BootedSite>>,
}

impl BootSequencer {
    pub fn new(
        framework: Arc<dyn GuestFramework>,
        loader: Arc<dyn RuntimeLoader>,
        file_lock: Arc<dyn FileLockClient>,
        options: SequencerOptions,
    ) -> Self {
        let (readiness, _) = watch::channel(Readiness::Pending);
        Self {
            framework,
            loader,
            file_lock,
            options,
            signals: Arc::new(Signals {
                state: Mutex::new(BootState::NotBooted),
                readiness,
            }),
            booted: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BootState {
        *self.signals.state.lock()
    }

    pub fn readiness(&self) -> watch::Receiver<Readiness> {
        self.signals.readiness.subscribe()
    }

    /// Run the boot sequence. Fails with `AlreadyBooted` on every call but
    /// the first, and with `Boot` when any step of the sequence fails.
    pub async fn boot(&self, params: BootParameters) -> PressboxResult<()> {
        {
            let mut state = self.signals.state.lock();
            if *state != BootState::NotBooted {
                tracing::warn!(state = ?*state, "Rejecting repeated boot");
                return Err(PressboxError::AlreadyBooted);
            }
            *state = BootState::Booting;
        }
        let mut guard = BootGuard::new(Arc::clone(&self.signals));

        tracing::info!(
            site_url = %params.absolute_url,
            php_version = %params.php_version,
            wp_version = params.wp_version.as_deref().unwrap_or("unspecified"),
            first_process_id = params.first_process_id,
            process_id_space_length = params.process_id_space_length,
            "Booting guest runtime"
        );

        let run = self.run_pipeline(params);
        let result = match self.options.boot_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => Err(PressboxError::Boot(format!(
                    "boot timed out after {:?}",
                    limit
                ))),
            },
            None => run.await,
        };

        guard.disarm();
        match result {
            Ok(booted) => {
                *self.booted.lock() = Some(booted);
                self.signals.ready();
                tracing::info!("Guest runtime ready");
                Ok(())
            }
            Err(e) => {
                let message = match e {
                    PressboxError::Boot(message) => message,
                    other => other.to_string(),
                };
                tracing::error!("Boot failed: {}", message);
                self.signals.fail(message.clone());
                Err(PressboxError::Boot(message))
            }
        }
    }

    async fn run_pipeline(&self, params: BootParameters) -> PressboxResult<BootedSite> {
        params.validate()?;
        let pids = ProcessIdAllocator::new(params.first_process_id, params.process_id_space_length)?;

        let ctx = Arc::new(tokio::sync::Mutex::new(BootPipelineContext::new(
            params,
            Arc::clone(&self.framework),
            Arc::clone(&self.loader),
            Arc::clone(&self.file_lock),
            pids,
        )));

        let metrics = PipelineExecutor::execute(boot_plan(), Arc::clone(&ctx)).await?;
        metrics.log();

        let mut ctx = ctx.lock().await;
        let site = ctx
            .site
            .take()
            .ok_or_else(|| PressboxError::Internal("framework_boot task must run first".into()))?;
        let primary = ctx
            .primary
            .take()
            .ok_or_else(|| PressboxError::Internal("framework_boot task must run first".into()))?;
        Ok(BootedSite { site, primary })
    }

    /// Resolve once the boot succeeded, or fail with the boot error.
    pub async fn wait_ready(&self) -> PressboxResult<()> {
        let mut rx = self.readiness();
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                Readiness::Ready => return Ok(()),
                Readiness::Failed(message) => return Err(PressboxError::Boot(message)),
                Readiness::Pending => {}
            }
            rx.changed()
                .await
                .map_err(|_| PressboxError::Internal("readiness signal dropped".into()))?;
        }
    }

    /// Forward a request to the booted site.
    pub async fn request(&self, request: HttpRequest) -> PressboxResult<HttpResponse> {
        let site = self
            .booted
            .lock()
            .as_ref()
            .map(|booted| Arc::clone(&booted.site))
            .ok_or_else(|| {
                PressboxError::InvalidState(format!(
                    "runtime is not serving requests (state: {:?})",
                    self.state()
                ))
            })?;
        site.request(request).await
    }

    /// Tear down the booted site. Idempotent; a no-op before a successful boot.
    pub fn dispose(&self) {
        if let Some(booted) = self.booted.lock().take() {
            tracing::info!(process_id = booted.primary.process_id(), "Disposing guest runtime");
            booted.primary.dispose();
        }
    }
}
