//! On-disk layout of the pressbox home directory.
//!
//! ```text
//! <home>/
//!   cache/    downloaded packages, one file per cache key
//!   locks/    lock files guarding cache keys across processes
//!   logs/     rolling host logs
//!   sites/    one directory per site root handed to workers
//! ```

use std::path::{Path, PathBuf};

pub mod dirs {
    pub const CACHE: &str = "cache";
    pub const LOCKS: &str = "locks";
    pub const LOGS: &str = "logs";
    pub const SITES: &str = "sites";
}

#[derive(Debug, Clone)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
        }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::CACHE)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOCKS)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS)
    }

    pub fn sites_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::SITES)
    }

    /// Site root handed to a worker, by site name.
    pub fn site_dir(&self, name: &str) -> PathBuf {
        self.sites_dir().join(name)
    }

    /// Create every directory of the layout.
    pub fn prepare(&self) -> std::io::Result<()> {
        for dir in [
            self.cache_dir(),
            self.locks_dir(),
            self.logs_dir(),
            self.sites_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
