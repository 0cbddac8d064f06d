//! Playground bootstrap on the host side.
//!
//! ```text
//! resolve versions ─> fetch packages (cache) ─> spawn worker
//!     ─> is_connected ─> boot(params) ─> is_ready ─> serve requests
//! ```

mod shared;
mod versions;

pub use shared::{SharedInit, shared_playground};
pub use versions::{PreferredVersions, SQLITE_INTEGRATION_CACHE_KEY, SQLITE_INTEGRATION_URL};

use crate::download::CachedDownloader;
use crate::lock::{FileLockManager, FileLockService};
use crate::relay::{RequestHandler, follow_redirects};
use crate::runtime::{PlaygroundOptions, PressboxRuntime};
use crate::supervisor::{Supervisor, WorkerHandle, WorkerLaunch};
use async_trait::async_trait;
use pressbox_shared::{
    BootParameters, HttpRequest, HttpResponse, PressboxError, PressboxResult,
};
use serde_json::Value;
use std::sync::Arc;

const DEFAULT_SITE: &str = "default";

/// Default process id range: every id a double can represent exactly.
const DEFAULT_PROCESS_ID_SPACE_LENGTH: u64 = (1 << 53) - 1;

/// Worker runtime methods used by the host.
mod methods {
    pub const IS_CONNECTED: &str = "is_connected";
    pub const BOOT: &str = "boot";
    pub const IS_READY: &str = "is_ready";
    pub const REQUEST: &str = "request";
}

/// Packages handed to the worker.
#[derive(Debug, Default)]
pub struct Artifacts {
    pub wordpress: Option<Vec<u8>>,
    pub sqlite_integration: Option<Vec<u8>>,
}

/// Fetch the packages for `versions` through the cache. Offline, only
/// cached packages are used; missing ones are left out.
pub async fn resolve_artifacts(
    downloader: &CachedDownloader,
    versions: &PreferredVersions,
    offline: bool,
) -> PressboxResult<Artifacts> {
    let wordpress = resolve_one(
        downloader,
        &versions.application_url(),
        &versions.application_cache_key(),
        offline,
    )
    .await?;
    let sqlite_integration = resolve_one(
        downloader,
        SQLITE_INTEGRATION_URL,
        SQLITE_INTEGRATION_CACHE_KEY,
        offline,
    )
    .await?;
    Ok(Artifacts {
        wordpress,
        sqlite_integration,
    })
}

async fn resolve_one(
    downloader: &CachedDownloader,
    url: &str,
    key: &str,
    offline: bool,
) -> PressboxResult<Option<Vec<u8>>> {
    let file = if offline {
        let cached = downloader.cached(key)?;
        if cached.is_none() {
            tracing::warn!(key, "Offline and not cached, booting without it");
        }
        cached
    } else {
        Some(downloader.fetch(url, key).await?)
    };
    match file {
        Some(file) => Ok(Some(file.read().await?)),
        None => Ok(None),
    }
}

/// Boot parameters for `options`, with the resolved versions and packages.
pub fn boot_parameters(
    options: &PlaygroundOptions,
    versions: &PreferredVersions,
    artifacts: Artifacts,
) -> BootParameters {
    BootParameters {
        wp_version: Some(versions.wp.clone()),
        php_version: versions.php.clone(),
        absolute_url: options.site_url().to_string(),
        mounts_before_wp_install: options.mounts_before_install.clone(),
        mounts_after_wp_install: options.mounts_after_install.clone(),
        wordpress_package: artifacts.wordpress,
        sqlite_integration_package: artifacts.sqlite_integration,
        first_process_id: options.first_process_id.unwrap_or(0),
        process_id_space_length: options
            .process_id_space_length
            .unwrap_or(DEFAULT_PROCESS_ID_SPACE_LENGTH),
        follow_symlinks: options.follow_symlinks,
        trace: options.trace,
        data_sql_path: options.data_sql_path.clone(),
    }
}

/// A booted site living in its own worker process.
#[derive(Debug)]
pub struct Playground {
    worker: WorkerHandle,
    site_url: String,
    max_redirects: usize,
}

impl Playground {
    /// Resolve packages, spawn a worker and boot it.
    pub async fn boot(
        runtime: &PressboxRuntime,
        supervisor: &Supervisor,
        options: PlaygroundOptions,
    ) -> PressboxResult<Self> {
        let versions = PreferredVersions::resolve(
            options.blueprint.as_ref(),
            options.php_version.as_deref(),
            options.wp_version.as_deref(),
        );
        tracing::info!(php = %versions.php, wp = %versions.wp, "Resolved versions");

        let downloader = runtime
            .downloader()
            .clone()
            .with_timeout(options.download_timeout);
        let artifacts = resolve_artifacts(&downloader, &versions, options.offline).await?;

        let launch = WorkerLaunch {
            site_root: runtime
                .layout()
                .site_dir(options.site_name.as_deref().unwrap_or(DEFAULT_SITE)),
            boot_timeout: options.boot_timeout,
        };
        let params = boot_parameters(&options, &versions, artifacts);

        Self::boot_with(
            supervisor,
            runtime.file_locks(),
            &launch,
            params,
            options.max_redirects(),
        )
        .await
    }

    /// Spawn a worker for `launch` and boot it with `params`.
    ///
    /// The worker is disposed again if any step after the spawn fails.
    pub async fn boot_with(
        supervisor: &Supervisor,
        locks: Arc<FileLockManager>,
        launch: &WorkerLaunch,
        params: BootParameters,
        max_redirects: usize,
    ) -> PressboxResult<Self> {
        let worker = supervisor
            .spawn(launch, Arc::new(FileLockService::new(locks)))
            .await?;
        let playground = Self {
            worker,
            site_url: params.absolute_url.clone(),
            max_redirects,
        };

        if let Err(e) = playground.start(&params).await {
            tracing::error!(worker_id = %playground.worker.id(), "Playground boot failed: {}", e);
            if let Err(dispose_err) = playground.dispose().await {
                tracing::warn!("Dispose after failed boot also failed: {}", dispose_err);
            }
            return Err(e);
        }
        Ok(playground)
    }

    async fn start(&self, params: &BootParameters) -> PressboxResult<()> {
        let runtime = self.worker.runtime();

        let connected: bool = runtime.call(methods::IS_CONNECTED, &()).await?;
        if !connected {
            return Err(PressboxError::Spawn(
                "worker runtime reported not connected".into(),
            ));
        }

        runtime.call::<_, Value>(methods::BOOT, params).await?;
        let ready: bool = runtime.call(methods::IS_READY, &()).await?;
        if !ready {
            return Err(PressboxError::Boot("worker reported not ready".into()));
        }

        tracing::info!(worker_id = %self.worker.id(), site_url = %self.site_url, "Playground ready");
        Ok(())
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    /// Forward one request to the booted site.
    pub async fn request(&self, request: HttpRequest) -> PressboxResult<HttpResponse> {
        self.worker.runtime().call(methods::REQUEST, &request).await
    }

    /// Forward a request and follow 301/302 redirects.
    pub async fn request_follow_redirects(
        &self,
        request: HttpRequest,
    ) -> PressboxResult<HttpResponse> {
        follow_redirects(self, request, self.max_redirects).await
    }

    /// Tear down the worker: guest runtime first, then transport and process.
    pub async fn dispose(&self) -> PressboxResult<()> {
        self.worker.dispose().await
    }
}

#[async_trait]
impl RequestHandler for Playground {
    async fn request(&self, request: HttpRequest) -> PressboxResult<HttpResponse> {
        Playground::request(self, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SupervisorOptions;
    use crate::supervisor::WorkerState;
    use crate::testing::{FakeController, Script};
    use parking_lot::Mutex;
    use pressbox_shared::{MountDescriptor, Service};
    use serde_json::json;

    /// Worker runtime answering like a booted site.
    #[derive(Default)]
    struct FakeRuntime {
        calls: Mutex<Vec<String>>,
        booted_with: Mutex<Option<BootParameters>>,
        fail_boot: bool,
    }

    #[async_trait]
    impl Service for FakeRuntime {
        async fn call(&self, method: &str, params: Value) -> PressboxResult<Value> {
            self.calls.lock().push(method.to_string());
            match method {
                "is_connected" | "is_ready" => Ok(json!(true)),
                "boot" if self.fail_boot => Err(PressboxError::Boot("no docroot".into())),
                "boot" => {
                    *self.booted_with.lock() = Some(serde_json::from_value(params)?);
                    Ok(Value::Null)
                }
                "request" => {
                    let request: HttpRequest = serde_json::from_value(params)?;
                    let response = match request.url.as_str() {
                        "/wp-admin" => HttpResponse::new(301).with_header("location", "/wp-admin/"),
                        "/wp-admin/" => HttpResponse::new(200).with_body("dashboard"),
                        _ => HttpResponse::new(404),
                    };
                    Ok(serde_json::to_value(response)?)
                }
                "dispose" => Ok(Value::Null),
                other => Err(PressboxError::Unsupported(other.to_string())),
            }
        }
    }

    async fn boot(
        runtime: Arc<FakeRuntime>,
        params: BootParameters,
    ) -> (Arc<FakeController>, PressboxResult<Playground>) {
        let controller = Arc::new(FakeController::new(Script::Ready(runtime)));
        let supervisor = Supervisor::new(controller.clone(), SupervisorOptions::default());
        let result = Playground::boot_with(
            &supervisor,
            Arc::new(FileLockManager::new()),
            &WorkerLaunch::new("/sites/default"),
            params,
            20,
        )
        .await;
        (controller, result)
    }

    #[tokio::test]
    async fn test_boot_sequence_and_requests() {
        let runtime = Arc::new(FakeRuntime::default());
        let mut params = BootParameters::new("http://localhost:9400");
        params.mounts_after_wp_install = vec![MountDescriptor::new("/db", "/wordpress/wp-content/database")];

        let (controller, playground) = boot(runtime.clone(), params).await;
        let playground = playground.unwrap();
        assert_eq!(playground.site_url(), "http://localhost:9400");
        assert_eq!(controller.lock_answer().await, Some(true));
        assert_eq!(
            controller.launches.lock()[0].site_root,
            std::path::PathBuf::from("/sites/default")
        );

        let booted = runtime.booted_with.lock().clone().unwrap();
        assert_eq!(booted.mounts_after_wp_install[0].vfs_path, "/wordpress/wp-content/database");

        let response = playground.request(HttpRequest::get("/wp-admin")).await.unwrap();
        assert_eq!(response.http_status_code, 301);

        let response = playground
            .request_follow_redirects(HttpRequest::get("/wp-admin"))
            .await
            .unwrap();
        assert_eq!(response.text(), "dashboard");

        playground.dispose().await.unwrap();
        assert_eq!(playground.worker().state(), WorkerState::Terminated);
        assert_eq!(
            *runtime.calls.lock(),
            vec![
                "is_connected",
                "boot",
                "is_ready",
                "request",
                "request",
                "request",
                "dispose"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_boot_disposes_worker() {
        let runtime = Arc::new(FakeRuntime {
            fail_boot: true,
            ..Default::default()
        });
        let (controller, result) = boot(runtime.clone(), BootParameters::new("http://localhost")).await;

        match result {
            Err(PressboxError::Boot(message)) => assert_eq!(message, "no docroot"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(controller.log.waited());
        assert_eq!(runtime.calls.lock().last().map(String::as_str), Some("dispose"));
    }

    #[test]
    fn test_boot_parameters_from_options() {
        let options = PlaygroundOptions {
            mounts_before_install: vec![MountDescriptor::new("/src", "/wordpress/wp-content/plugins/x")],
            trace: true,
            data_sql_path: Some("/srv/seed.sql".into()),
            ..Default::default()
        };
        let versions = PreferredVersions::resolve(None, None, Some("6.4"));
        let params = boot_parameters(&options, &versions, Artifacts::default());

        assert_eq!(params.absolute_url, "http://localhost");
        assert_eq!(params.php_version, "8.2");
        assert_eq!(params.wp_version.as_deref(), Some("6.4"));
        assert_eq!(params.first_process_id, 0);
        assert_eq!(params.process_id_space_length, (1 << 53) - 1);
        assert_eq!(params.mounts_before_wp_install.len(), 1);
        assert!(params.trace);
        assert_eq!(params.data_sql_path.as_deref(), Some(std::path::Path::new("/srv/seed.sql")));
        params.validate().unwrap();
    }
}
