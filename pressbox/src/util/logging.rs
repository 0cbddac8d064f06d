use crate::runtime::layout::FilesystemLayout;
use pressbox_shared::{PressboxError, PressboxResult};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "pressbox.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Route host tracing output to a daily-rolling file under `<home>/logs`.
///
/// Filtered by `RUST_LOG`, `info` when unset. Safe to call repeatedly; only
/// the first call installs a subscriber.
pub fn init_logging_for(layout: &FilesystemLayout) -> PressboxResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let logs_dir = layout.logs_dir();
    std::fs::create_dir_all(&logs_dir).map_err(|e| {
        PressboxError::Storage(format!(
            "failed to create log directory {}: {}",
            logs_dir.display(),
            e
        ))
    })?;

    let appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    if LOG_GUARD.set(guard).is_err() {
        // Lost the race to a concurrent caller; its subscriber wins.
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .try_init();

    tracing::debug!(logs_dir = %logs_dir.display(), "Logging initialized");
    Ok(())
}
