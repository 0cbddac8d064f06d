use crate::guest::{GuestRuntime, HostBinding, RuntimeLoader, RuntimeOptions};
use crate::lock::FileLockClient;
use async_trait::async_trait;
use parking_lot::RwLock;
use pressbox_shared::{PressboxError, PressboxResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Guest filesystem view over a host site directory.
///
/// Mounts are per instance: a freshly loaded instance sees only the site
/// directory until mounts are applied to it.
pub struct NativeRuntime {
    process_id: u64,
    root: PathBuf,
    mounts: RwLock<BTreeMap<String, PathBuf>>,
    follow_symlinks: bool,
    trace: bool,
    file_lock: Arc<dyn FileLockClient>,
    disposed: AtomicBool,
}

impl NativeRuntime {
    pub fn new(root: impl Into<PathBuf>, options: RuntimeOptions) -> Self {
        Self {
            process_id: options.process_id,
            root: root.into(),
            mounts: RwLock::new(BTreeMap::new()),
            follow_symlinks: options.follow_symlinks,
            trace: options.trace,
            file_lock: options.file_lock,
            disposed: AtomicBool::new(false),
        }
    }

    /// Host location backing a guest path, honoring the longest mount prefix.
    pub fn host_path(&self, path: &str) -> PathBuf {
        let guest = normalize(path);
        let mounts = self.mounts.read();
        let hit = mounts
            .iter()
            .filter(|(prefix, _)| is_under(&guest, prefix))
            .max_by_key(|(prefix, _)| prefix.len());

        match hit {
            Some((prefix, host)) => join_relative(host, &guest[prefix.len()..]),
            None => join_relative(&self.root, &guest),
        }
    }

    fn resolve(&self, op: &str, path: &str) -> PressboxResult<PathBuf> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PressboxError::InvalidState(format!(
                "runtime {} is disposed",
                self.process_id
            )));
        }
        self.trace_op(op, path);

        let host = self.host_path(path);
        if !self.follow_symlinks && is_symlink(&host) {
            return Err(PressboxError::Storage(format!(
                "{} resolves to a symlink and symlinks are not followed",
                path
            )));
        }
        Ok(host)
    }

    fn trace_op(&self, op: &str, path: &str) {
        if self.trace {
            let elapsed = trace_epoch().elapsed().as_secs_f64();
            tracing::trace!(
                target: "pressbox::guest",
                "{:015.6} {:016} {} {}",
                elapsed,
                self.process_id,
                op,
                path
            );
        }
    }
}

impl GuestRuntime for NativeRuntime {
    fn process_id(&self) -> u64 {
        self.process_id
    }

    fn mkdir(&self, path: &str) -> PressboxResult<()> {
        let host = self.resolve("mkdir", path)?;
        std::fs::create_dir_all(&host).map_err(|e| {
            PressboxError::Storage(format!("mkdir {} ({}): {}", path, host.display(), e))
        })
    }

    fn mount(&self, path: &str, binding: HostBinding) -> PressboxResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PressboxError::InvalidState(format!(
                "runtime {} is disposed",
                self.process_id
            )));
        }
        self.trace_op("mount", path);

        let host = binding.host_path();
        if !host.exists() {
            return Err(PressboxError::Storage(format!(
                "cannot mount {} at {}: host path does not exist",
                host.display(),
                path
            )));
        }

        let previous = self
            .mounts
            .write()
            .insert(normalize(path), host.to_path_buf());
        if let Some(previous) = previous {
            tracing::debug!(
                process_id = self.process_id,
                vfs_path = path,
                replaced = %previous.display(),
                "Mount replaced an earlier binding"
            );
        }
        Ok(())
    }

    fn write_file(&self, path: &str, contents: &[u8]) -> PressboxResult<()> {
        let host = self.resolve("write", path)?;
        std::fs::write(&host, contents).map_err(|e| {
            PressboxError::Storage(format!("write {} ({}): {}", path, host.display(), e))
        })
    }

    fn read_file(&self, path: &str) -> PressboxResult<Vec<u8>> {
        let host = self.resolve("read", path)?;
        std::fs::read(&host).map_err(|e| {
            PressboxError::Storage(format!("read {} ({}): {}", path, host.display(), e))
        })
    }

    fn file_exists(&self, path: &str) -> bool {
        self.resolve("stat", path)
            .map(|host| host.is_file())
            .unwrap_or(false)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.resolve("stat", path)
            .map(|host| host.is_dir())
            .unwrap_or(false)
    }

    fn file_lock(&self) -> Option<Arc<dyn FileLockClient>> {
        Some(Arc::clone(&self.file_lock))
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.mounts.write().clear();
            tracing::debug!(process_id = self.process_id, "Runtime disposed");
        }
    }
}

/// Loads [`NativeRuntime`] instances over one site directory.
#[derive(Debug, Clone)]
pub struct NativeRuntimeLoader {
    site_root: PathBuf,
}

impl NativeRuntimeLoader {
    pub fn new(site_root: impl Into<PathBuf>) -> Self {
        Self {
            site_root: site_root.into(),
        }
    }

    pub fn site_root(&self) -> &Path {
        &self.site_root
    }
}

#[async_trait]
impl RuntimeLoader for NativeRuntimeLoader {
    async fn load(&self, options: RuntimeOptions) -> PressboxResult<Arc<dyn GuestRuntime>> {
        tokio::fs::create_dir_all(&self.site_root).await.map_err(|e| {
            PressboxError::Storage(format!(
                "failed to create site root {}: {}",
                self.site_root.display(),
                e
            ))
        })?;

        tracing::debug!(
            process_id = options.process_id,
            php_version = %options.php_version,
            site_root = %self.site_root.display(),
            "Loading native runtime"
        );
        Ok(Arc::new(NativeRuntime::new(&self.site_root, options)))
    }
}

fn trace_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Collapse `.`, `..` and repeated separators. Never climbs above `/`.
pub(crate) fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

pub(crate) fn is_under(path: &str, prefix: &str) -> bool {
    prefix == "/"
        || path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

fn join_relative(base: &Path, relative: &str) -> PathBuf {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NoopLock;

    fn runtime(root: &Path, follow_symlinks: bool) -> NativeRuntime {
        NativeRuntime::new(
            root,
            RuntimeOptions {
                php_version: "8.2".into(),
                process_id: 7,
                trace: true,
                follow_symlinks,
                file_lock: Arc::new(NoopLock::default()),
            },
        )
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/wordpress//wp-content/./plugins/"), "/wordpress/wp-content/plugins");
        assert_eq!(normalize("/../../etc"), "/etc");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn test_mkdir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), false);

        rt.mkdir("/wordpress/wp-content").unwrap();
        rt.mkdir("/wordpress/wp-content").unwrap();
        assert!(rt.is_dir("/wordpress/wp-content"));
        assert!(dir.path().join("wordpress/wp-content").is_dir());
    }

    #[test]
    fn test_longest_mount_prefix_wins() {
        let site = tempfile::tempdir().unwrap();
        let content = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        std::fs::write(uploads.path().join("a.txt"), b"upload").unwrap();
        std::fs::write(content.path().join("a.txt"), b"content").unwrap();

        let rt = runtime(site.path(), false);
        rt.mount("/wordpress/wp-content", HostBinding::new(content.path()))
            .unwrap();
        rt.mount("/wordpress/wp-content/uploads", HostBinding::new(uploads.path()))
            .unwrap();

        assert_eq!(rt.read_file("/wordpress/wp-content/a.txt").unwrap(), b"content");
        assert_eq!(
            rt.read_file("/wordpress/wp-content/uploads/a.txt").unwrap(),
            b"upload"
        );
        assert_eq!(
            rt.host_path("/wordpress/wp-contentx"),
            site.path().join("wordpress/wp-contentx")
        );
    }

    #[test]
    fn test_remount_replaces_binding() {
        let site = tempfile::tempdir().unwrap();
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        let rt = runtime(site.path(), false);
        rt.mount("/data", HostBinding::new(first.path())).unwrap();
        rt.mount("/data/", HostBinding::new(second.path())).unwrap();

        assert_eq!(rt.host_path("/data/x"), second.path().join("x"));
    }

    #[test]
    fn test_mount_requires_existing_host_path() {
        let site = tempfile::tempdir().unwrap();
        let rt = runtime(site.path(), false);
        let err = rt
            .mount("/data", HostBinding::new(site.path().join("missing")))
            .unwrap_err();
        assert!(matches!(err, PressboxError::Storage(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_respect_flag() {
        let site = tempfile::tempdir().unwrap();
        std::fs::write(site.path().join("real.txt"), b"hi").unwrap();
        std::os::unix::fs::symlink(site.path().join("real.txt"), site.path().join("link.txt"))
            .unwrap();

        assert!(runtime(site.path(), false).read_file("/link.txt").is_err());
        assert_eq!(runtime(site.path(), true).read_file("/link.txt").unwrap(), b"hi");
    }

    #[test]
    fn test_dispose_blocks_further_access() {
        let site = tempfile::tempdir().unwrap();
        let rt = runtime(site.path(), false);
        rt.dispose();
        rt.dispose();
        assert!(matches!(rt.mkdir("/x"), Err(PressboxError::InvalidState(_))));
    }
}
