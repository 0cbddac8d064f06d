//! Process-wide shared playground.

use super::Playground;
use crate::runtime::{PlaygroundOptions, PressboxRuntime};
use pressbox_shared::PressboxResult;
use std::future::Future;
use tokio::sync::OnceCell;

/// A value initialized at most once, by the first caller that succeeds.
///
/// Concurrent callers share the in-flight initialization. A failed
/// initialization is not remembered; the next caller tries again.
pub struct SharedInit<T> {
    cell: OnceCell<T>,
}

impl<T> SharedInit<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> PressboxResult<&T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PressboxResult<T>>,
    {
        if let Some(value) = self.cell.get() {
            tracing::debug!("Using existing shared instance");
            return Ok(value);
        }
        self.cell.get_or_try_init(init).await
    }
}

impl<T> Default for SharedInit<T> {
    fn default() -> Self {
        Self::new()
    }
}

static SHARED_PLAYGROUND: SharedInit<Playground> = SharedInit::new();

/// The playground shared by the whole process, booted on the default
/// runtime by the first call. `options` only matter to that first call.
pub async fn shared_playground(options: PlaygroundOptions) -> PressboxResult<&'static Playground> {
    SHARED_PLAYGROUND
        .get_or_try_init(|| async move {
            tracing::info!("Booting the shared playground");
            PressboxRuntime::default_runtime()?
                .boot_playground(options)
                .await
        })
        .await
}
