use super::archive::install_package;
use super::site::NativeSiteHandler;
use crate::guest::{FrameworkBootOptions, GuestFramework, GuestRuntime, Package, SiteHandler};
use async_trait::async_trait;
use pressbox_shared::constants::guest_paths;
use pressbox_shared::{PressboxError, PressboxResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INSTALL_LOCK: &str = ".pressbox-install.lock";
const INSTALL_MARKER: &str = "/wordpress/.pressbox-installed";

/// Installs packaged sites into a native runtime and serves them.
#[derive(Debug, Clone)]
pub struct NativeFramework {
    site_root: PathBuf,
}

impl NativeFramework {
    pub fn new(site_root: impl Into<PathBuf>) -> Self {
        Self {
            site_root: site_root.into(),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.site_root.join(INSTALL_LOCK)
    }

    /// Unpack both packages unless an earlier boot already did.
    ///
    /// Extraction runs on the blocking pool; the install lock is held across
    /// it.
    async fn install(&self, primary: &Arc<dyn GuestRuntime>, install: Install) -> PressboxResult<()> {
        let lock = primary.file_lock();
        let lock_path = self.lock_path();

        if let Some(lock) = &lock {
            lock.lock_file(&lock_path, true).await?;
        } else {
            tracing::warn!("Runtime has no lock coordinator, installing without a lock");
        }

        let runtime = Arc::clone(primary);
        let result = tokio::task::spawn_blocking(move || install_locked(runtime.as_ref(), install))
            .await
            .unwrap_or_else(|e| Err(PressboxError::Internal(format!("install task failed: {}", e))));

        if let Some(lock) = &lock
            && let Err(e) = lock.unlock_file(&lock_path).await
        {
            tracing::warn!(path = %lock_path.display(), "Failed to release install lock: {}", e);
        }
        result
    }
}

/// What a fresh install puts into the document root.
struct Install {
    application: Option<Package>,
    integration: Option<Package>,
    data_sql_path: Option<PathBuf>,
}

fn install_locked(runtime: &dyn GuestRuntime, install: Install) -> PressboxResult<()> {
    if runtime.file_exists(INSTALL_MARKER) {
        tracing::debug!("Site already installed, skipping package extraction");
        return Ok(());
    }

    let Some(application) = install.application else {
        tracing::debug!("No application package, serving existing files");
        return Ok(());
    };

    let files = install_package(
        runtime,
        &application.name,
        &application.bytes,
        guest_paths::DOCUMENT_ROOT,
    )?;
    tracing::info!(package = %application.name, files, "Installed application package");

    if let Some(integration) = install.integration {
        let files = install_package(
            runtime,
            &integration.name,
            &integration.bytes,
            guest_paths::SQLITE_PLUGIN_DIR,
        )?;
        tracing::info!(package = %integration.name, files, "Installed integration package");
    }

    if let Some(path) = &install.data_sql_path {
        let dump = std::fs::read(path).map_err(|e| {
            PressboxError::Boot(format!("cannot read seed dump {}: {}", path.display(), e))
        })?;
        runtime.mkdir(guest_paths::DATABASE_DIR)?;
        runtime.write_file(guest_paths::DATA_SQL, &dump)?;
        tracing::info!(path = %path.display(), bytes = dump.len(), "Seeded database dump");
    }

    runtime.write_file(INSTALL_MARKER, application.name.as_bytes())
}

fn write_ini(runtime: &dyn GuestRuntime, entries: &BTreeMap<String, String>) -> PressboxResult<()> {
    let mut ini = String::new();
    for (key, value) in entries {
        ini.push_str(&format!("{} = \"{}\"\n", key, value));
    }
    runtime.mkdir(guest_paths::INTERNAL_SHARED)?;
    runtime.write_file(guest_paths::PHP_INI, ini.as_bytes())
}

fn write_constants(
    runtime: &dyn GuestRuntime,
    constants: &BTreeMap<String, serde_json::Value>,
) -> PressboxResult<()> {
    let json = serde_json::to_vec_pretty(constants)?;
    runtime.write_file(guest_paths::CONSTANTS, &json)
}

fn parent_dir(path: &str) -> Option<&str> {
    Path::new(path)
        .parent()
        .and_then(|p| p.to_str())
        .filter(|p| !p.is_empty() && *p != "/")
}

#[async_trait]
impl GuestFramework for NativeFramework {
    async fn boot(&self, options: FrameworkBootOptions) -> PressboxResult<Arc<dyn SiteHandler>> {
        let FrameworkBootOptions {
            site_url,
            runtime_factory,
            application_package,
            integration_package,
            sapi_name,
            create_files,
            ini_entries,
            constants,
            data_sql_path,
            hooks,
            cookie_store,
        } = options;

        let primary = runtime_factory().await?;
        tracing::debug!(
            process_id = primary.process_id(),
            sapi = %sapi_name,
            cookie_store,
            "Booting native site"
        );

        for (path, contents) in &create_files {
            if let Some(parent) = parent_dir(path) {
                primary.mkdir(parent)?;
            }
            primary.write_file(path, contents)?;
        }
        write_ini(primary.as_ref(), &ini_entries)?;
        write_constants(primary.as_ref(), &constants)?;

        if let Some(hook) = &hooks.before_files_materialized {
            hook(primary.as_ref())?;
        }

        self.install(
            &primary,
            Install {
                application: application_package,
                integration: integration_package,
                data_sql_path,
            },
        )
        .await?;

        if !primary.is_dir(guest_paths::DOCUMENT_ROOT) {
            primary.mkdir(guest_paths::DOCUMENT_ROOT).map_err(|e| {
                PressboxError::Boot(format!("document root is unavailable: {}", e))
            })?;
        }

        Ok(Arc::new(NativeSiteHandler::new(site_url, primary)))
    }
}
