//! Host configuration.

use pressbox_shared::MountDescriptor;
use pressbox_shared::constants::{defaults, env};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_HOME_DIR: &str = ".pressbox";

/// Options for a [`PressboxRuntime`](super::PressboxRuntime).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PressboxOptions {
    /// Home directory for cache, locks, logs and sites.
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,

    /// Worker binary; searched next to the current executable when `None`.
    #[serde(default)]
    pub worker_binary: Option<PathBuf>,

    #[serde(default)]
    pub supervisor: SupervisorOptions,
}

impl Default for PressboxOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            worker_binary: None,
            supervisor: SupervisorOptions::default(),
        }
    }
}

/// `$PRESSBOX_HOME`, else `~/.pressbox`, else `./.pressbox`.
pub fn default_home_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(env::HOME) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_HOME_DIR))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME_DIR))
}

/// Worker spawn and teardown bounds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SupervisorOptions {
    /// Give up waiting for the readiness message after this long.
    /// `None` waits indefinitely.
    #[serde(default, with = "duration_secs")]
    pub ready_timeout: Option<Duration>,

    /// Bound on each disposal step (remote teardown, process exit).
    #[serde(default = "default_dispose_timeout", with = "duration_secs")]
    pub dispose_timeout: Option<Duration>,
}

fn default_dispose_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            ready_timeout: None,
            dispose_timeout: default_dispose_timeout(),
        }
    }
}

/// Everything one playground boot needs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaygroundOptions {
    /// Runtime version; taken from the blueprint, then the preferred default.
    pub php_version: Option<String>,
    /// Application version; taken from the blueprint, then `latest`.
    pub wp_version: Option<String>,
    /// Blueprint document. Only `preferredVersions` is interpreted.
    pub blueprint: Option<serde_json::Value>,
    pub mounts_before_install: Vec<MountDescriptor>,
    pub mounts_after_install: Vec<MountDescriptor>,
    /// Site URL; `http://localhost` when unset.
    pub site_url: Option<String>,
    /// Site root name under `<home>/sites`.
    pub site_name: Option<String>,
    pub first_process_id: Option<u64>,
    pub process_id_space_length: Option<u64>,
    pub follow_symlinks: bool,
    pub trace: bool,
    /// Never touch the network; packages must already be cached.
    pub offline: bool,
    #[serde(with = "duration_secs")]
    pub boot_timeout: Option<Duration>,
    #[serde(with = "duration_secs")]
    pub download_timeout: Option<Duration>,
    /// Redirect hops followed by `request_follow_redirects`.
    pub max_redirects: Option<usize>,
    /// SQL dump seeding the database of a fresh install.
    pub data_sql_path: Option<PathBuf>,
}

impl PlaygroundOptions {
    pub fn site_url(&self) -> &str {
        self.site_url.as_deref().unwrap_or(defaults::SITE_URL)
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects.unwrap_or(defaults::MAX_REDIRECTS)
    }
}

/// Optional durations as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}
