//! Boot pipeline tasks.
//!
//! ```text
//! 1. LockGate       ─┬─ (wait for the host lock coordinator)
//!    ArtifactResolve ─┘ (packages from parameters, host CA bundle)
//! 2. FrameworkBoot      (runtime factory + pre-install mounts hook)
//! 3. PostInstallMounts  (mounts on the primary instance)
//! ```

use super::ca::load_ca_bundle;
use crate::guest::{
    BootHooks, FrameworkBootOptions, GuestFramework, GuestRuntime, Package, RuntimeFactory,
    RuntimeLoader, RuntimeOptions, SiteHandler,
};
use crate::lock::FileLockClient;
use crate::mounts::apply_mounts;
use crate::pid::ProcessIdAllocator;
use crate::pipeline::{BoxedTask, ExecutionPlan, PipelineTask, Stage};
use async_trait::async_trait;
use futures::FutureExt;
use pressbox_shared::constants::{defaults, guest_paths};
use pressbox_shared::{BootParameters, PressboxError, PressboxResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) type BootCtx = Arc<Mutex<BootPipelineContext>>;

/// Packages and files ready to hand to the framework.
pub(crate) struct ResolvedArtifacts {
    pub application: Option<Package>,
    pub integration: Option<Package>,
    pub ca_bundle: Vec<u8>,
}

/// Shared inputs and outputs of one boot.
pub(crate) struct BootPipelineContext {
    pub params: Arc<BootParameters>,
    pub framework: Arc<dyn GuestFramework>,
    pub loader: Arc<dyn RuntimeLoader>,
    pub file_lock: Arc<dyn FileLockClient>,
    pub pids: Arc<parking_lot::Mutex<ProcessIdAllocator>>,
    pub artifacts: Option<ResolvedArtifacts>,
    pub site: Option<Arc<dyn SiteHandler>>,
    pub primary: Option<Arc<dyn GuestRuntime>>,
}

impl BootPipelineContext {
    pub fn new(
        params: BootParameters,
        framework: Arc<dyn GuestFramework>,
        loader: Arc<dyn RuntimeLoader>,
        file_lock: Arc<dyn FileLockClient>,
        pids: ProcessIdAllocator,
    ) -> Self {
        Self {
            params: Arc::new(params),
            framework,
            loader,
            file_lock,
            pids: Arc::new(parking_lot::Mutex::new(pids)),
            artifacts: None,
            site: None,
            primary: None,
        }
    }
}

pub(crate) fn boot_plan() -> ExecutionPlan<BootCtx> {
    let stages: Vec<Stage<BoxedTask<BootCtx>>> = vec![
        Stage::parallel(
            "prepare",
            vec![Box::new(LockGateTask), Box::new(ArtifactResolveTask)],
        ),
        Stage::sequential("framework", vec![Box::new(FrameworkBootTask)]),
        Stage::sequential("mounts", vec![Box::new(PostInstallMountsTask)]),
    ];
    ExecutionPlan::new(stages)
}

fn task_start(name: &str) {
    tracing::debug!(task = name, "Boot task starting");
}

fn log_task_error(name: &str, e: &PressboxError) {
    tracing::error!(task = name, "Boot task failed: {}", e);
}

// ============================================================================
// STAGE 1
// ============================================================================

pub(crate) struct LockGateTask;

#[async_trait]
impl PipelineTask<BootCtx> for LockGateTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> PressboxResult<()> {
        let task_name = self.name();
        task_start(task_name);

        let file_lock = Arc::clone(&ctx.lock().await.file_lock);

        let connected = file_lock
            .is_connected()
            .await
            .inspect_err(|e| log_task_error(task_name, e))?;
        if !connected {
            let err = PressboxError::Boot("file lock coordinator reported not connected".into());
            log_task_error(task_name, &err);
            return Err(err);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "lock_gate"
    }
}

pub(crate) struct ArtifactResolveTask;

#[async_trait]
impl PipelineTask<BootCtx> for ArtifactResolveTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> PressboxResult<()> {
        task_start(self.name());

        let params = Arc::clone(&ctx.lock().await.params);
        let wp_version = params
            .wp_version
            .as_deref()
            .unwrap_or(defaults::PREFERRED_WP_VERSION);

        let application = params
            .wordpress_package
            .clone()
            .map(|bytes| Package::new(format!("wordpress-{}.tar.gz", wp_version), bytes));
        let integration = params
            .sqlite_integration_package
            .clone()
            .map(|bytes| Package::new("sqlite-database-integration.tar.gz", bytes));
        let ca_bundle = load_ca_bundle().await;

        tracing::debug!(
            application = application.as_ref().map(|p| p.bytes.len()),
            integration = integration.as_ref().map(|p| p.bytes.len()),
            "Resolved boot artifacts"
        );

        ctx.lock().await.artifacts = Some(ResolvedArtifacts {
            application,
            integration,
            ca_bundle,
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "artifact_resolve"
    }
}

// ============================================================================
// STAGE 2
// ============================================================================

pub(crate) struct FrameworkBootTask;

#[async_trait]
impl PipelineTask<BootCtx> for FrameworkBootTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> PressboxResult<()> {
        let task_name = self.name();
        task_start(task_name);

        let (params, framework, factory, artifacts) = {
            let mut ctx = ctx.lock().await;
            let artifacts = ctx.artifacts.take().ok_or_else(|| {
                PressboxError::Internal("artifact_resolve task must run first".into())
            })?;
            let factory = runtime_factory(&ctx);
            (
                Arc::clone(&ctx.params),
                Arc::clone(&ctx.framework),
                factory,
                artifacts,
            )
        };

        let mut create_files = BTreeMap::new();
        create_files.insert(guest_paths::CA_BUNDLE.to_string(), artifacts.ca_bundle);

        let mut ini_entries = BTreeMap::new();
        ini_entries.insert("openssl.cafile".to_string(), guest_paths::CA_BUNDLE.to_string());
        ini_entries.insert("allow_url_fopen".to_string(), "1".to_string());
        ini_entries.insert("disable_functions".to_string(), String::new());

        let constants = debug_constants();

        let before = params.mounts_before_wp_install.clone();
        let hooks = BootHooks {
            before_files_materialized: Some(Box::new(move |runtime: &dyn GuestRuntime| {
                apply_mounts(runtime, &before)
            })),
        };

        let site = framework
            .boot(FrameworkBootOptions {
                site_url: params.absolute_url.clone(),
                runtime_factory: factory,
                application_package: artifacts.application,
                integration_package: artifacts.integration,
                sapi_name: defaults::SAPI_NAME.to_string(),
                create_files,
                ini_entries,
                constants,
                data_sql_path: params.data_sql_path.clone(),
                hooks,
                cookie_store: false,
            })
            .await
            .inspect_err(|e| log_task_error(task_name, e))?;

        let primary = site.primary_instance();
        tracing::debug!(process_id = primary.process_id(), "Framework booted");

        let mut ctx = ctx.lock().await;
        ctx.primary = Some(primary);
        ctx.site = Some(site);
        Ok(())
    }

    fn name(&self) -> &str {
        "framework_boot"
    }
}

/// Debug output goes to the log file, never into responses.
fn debug_constants() -> BTreeMap<String, Value> {
    let mut constants = BTreeMap::new();
    constants.insert("WP_DEBUG".to_string(), Value::Bool(true));
    constants.insert("WP_DEBUG_LOG".to_string(), Value::Bool(true));
    constants.insert("WP_DEBUG_DISPLAY".to_string(), Value::Bool(false));
    constants
}

/// Factory giving every new instance the next id from the allocator.
fn runtime_factory(ctx: &BootPipelineContext) -> RuntimeFactory {
    let loader = Arc::clone(&ctx.loader);
    let pids = Arc::clone(&ctx.pids);
    let file_lock = Arc::clone(&ctx.file_lock);
    let php_version = ctx.params.php_version.clone();
    let trace = ctx.params.trace;
    let follow_symlinks = ctx.params.follow_symlinks;

    Arc::new(move || {
        let options = RuntimeOptions {
            php_version: php_version.clone(),
            process_id: pids.lock().next(),
            trace,
            follow_symlinks,
            file_lock: Arc::clone(&file_lock),
        };
        tracing::debug!(process_id = options.process_id, "Instantiating guest runtime");
        let loader = Arc::clone(&loader);
        async move { loader.load(options).await }.boxed()
    })
}

// ============================================================================
// STAGE 3
// ============================================================================

pub(crate) struct PostInstallMountsTask;

#[async_trait]
impl PipelineTask<BootCtx> for PostInstallMountsTask {
    async fn run(self: Box<Self>, ctx: BootCtx) -> PressboxResult<()> {
        let task_name = self.name();
        task_start(task_name);

        let ctx = ctx.lock().await;
        let primary = ctx
            .primary
            .as_ref()
            .ok_or_else(|| PressboxError::Internal("framework_boot task must run first".into()))?;

        apply_mounts(primary.as_ref(), &ctx.params.mounts_after_wp_install)
            .inspect_err(|e| log_task_error(task_name, e))
    }

    fn name(&self) -> &str {
        "post_install_mounts"
    }
}
