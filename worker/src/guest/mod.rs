//! Guest capabilities the worker drives.
//!
//! The worker never interprets the guest application itself. It sees three
//! opaque capabilities:
//!
//! - [`RuntimeLoader`]: builds one low-level runtime instance from options.
//! - [`GuestRuntime`]: one runtime instance (filesystem view + mounts).
//! - [`GuestFramework`]: turns packages plus a runtime factory into a
//!   [`SiteHandler`] that services HTTP-shaped requests.
//!
//! A native implementation lives in [`native`].

pub mod native;

use crate::lock::FileLockClient;
use async_trait::async_trait;
use futures::future::BoxFuture;
use pressbox_shared::{HttpRequest, HttpResponse, PressboxResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Host storage bound into the guest filesystem by a mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBinding {
    host_path: PathBuf,
}

impl HostBinding {
    pub fn new(host_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
        }
    }

    pub fn host_path(&self) -> &Path {
        &self.host_path
    }
}

/// One instantiation of the low-level guest runtime.
pub trait GuestRuntime: Send + Sync {
    /// Tracing/isolation id assigned at construction.
    fn process_id(&self) -> u64;

    /// Create a directory (and parents). Existing directories are not an error.
    fn mkdir(&self, path: &str) -> PressboxResult<()>;

    /// Bind `path` to host storage. A later mount of the same path replaces
    /// the earlier one.
    fn mount(&self, path: &str, binding: HostBinding) -> PressboxResult<()>;

    fn write_file(&self, path: &str, contents: &[u8]) -> PressboxResult<()>;

    fn read_file(&self, path: &str) -> PressboxResult<Vec<u8>>;

    fn file_exists(&self, path: &str) -> bool;

    fn is_dir(&self, path: &str) -> bool;

    /// Lock coordinator the instance was constructed with, if any.
    fn file_lock(&self) -> Option<Arc<dyn FileLockClient>> {
        None
    }

    /// Release instance state. Called once during worker teardown.
    fn dispose(&self) {}
}

/// Options for constructing one runtime instance.
#[derive(Clone)]
pub struct RuntimeOptions {
    pub php_version: String,
    pub process_id: u64,
    pub trace: bool,
    pub follow_symlinks: bool,
    pub file_lock: Arc<dyn FileLockClient>,
}

impl std::fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeOptions")
            .field("php_version", &self.php_version)
            .field("process_id", &self.process_id)
            .field("trace", &self.trace)
            .field("follow_symlinks", &self.follow_symlinks)
            .finish()
    }
}

/// Builds runtime instances.
#[async_trait]
pub trait RuntimeLoader: Send + Sync {
    async fn load(&self, options: RuntimeOptions) -> PressboxResult<Arc<dyn GuestRuntime>>;
}

/// Produces a fresh runtime instance each time the framework needs one.
pub type RuntimeFactory =
    Arc<dyn Fn() -> BoxFuture<'static, PressboxResult<Arc<dyn GuestRuntime>>> + Send + Sync>;

/// Hook run against an instance before the application files are materialized.
pub type BeforeFilesHook = Box<dyn Fn(&dyn GuestRuntime) -> PressboxResult<()> + Send + Sync>;

#[derive(Default)]
pub struct BootHooks {
    pub before_files_materialized: Option<BeforeFilesHook>,
}

/// Packaged artifact handed to the framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Package {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Everything the framework boot entry point receives.
pub struct FrameworkBootOptions {
    pub site_url: String,
    pub runtime_factory: RuntimeFactory,
    pub application_package: Option<Package>,
    pub integration_package: Option<Package>,
    pub sapi_name: String,
    /// Files to create in every instance, keyed by guest path.
    pub create_files: BTreeMap<String, Vec<u8>>,
    pub ini_entries: BTreeMap<String, String>,
    /// Application constants, e.g. `WP_DEBUG`.
    pub constants: BTreeMap<String, serde_json::Value>,
    /// Host SQL dump seeding the database of a fresh install.
    pub data_sql_path: Option<PathBuf>,
    pub hooks: BootHooks,
    pub cookie_store: bool,
}

/// Request-servicing handle returned by a framework boot.
#[async_trait]
pub trait SiteHandler: Send + Sync {
    /// Instance the site was installed into.
    fn primary_instance(&self) -> Arc<dyn GuestRuntime>;

    async fn request(&self, request: HttpRequest) -> PressboxResult<HttpResponse>;
}

/// Guest application framework boot entry point.
#[async_trait]
pub trait GuestFramework: Send + Sync {
    async fn boot(&self, options: FrameworkBootOptions) -> PressboxResult<Arc<dyn SiteHandler>>;
}
