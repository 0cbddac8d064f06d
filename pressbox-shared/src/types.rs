//! Value types exchanged between the host and the worker.

use crate::constants::defaults;
use crate::errors::{PressboxError, PressboxResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Binding of a host location to a path inside the guest filesystem view.
///
/// Nothing enforces unique guest paths. When two descriptors target the same
/// guest path, the one applied last wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountDescriptor {
    pub host_path: PathBuf,
    pub vfs_path: String,
}

impl MountDescriptor {
    pub fn new(host_path: impl Into<PathBuf>, vfs_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            vfs_path: vfs_path.into(),
        }
    }

    /// Parse the `host:vfs` form used on the command line.
    pub fn parse(spec: &str) -> PressboxResult<Self> {
        let (host, vfs) = spec.split_once(':').ok_or_else(|| {
            PressboxError::Config(format!(
                "mount '{}' must have the form <host-path>:<vfs-path>",
                spec
            ))
        })?;
        if host.is_empty() || vfs.is_empty() {
            return Err(PressboxError::Config(format!(
                "mount '{}' has an empty side",
                spec
            )));
        }
        Ok(Self::new(host, vfs))
    }
}

/// Immutable description of one boot attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootParameters {
    #[serde(default)]
    pub wp_version: Option<String>,
    #[serde(default = "default_php_version")]
    pub php_version: String,
    pub absolute_url: String,
    #[serde(default)]
    pub mounts_before_wp_install: Vec<MountDescriptor>,
    #[serde(default)]
    pub mounts_after_wp_install: Vec<MountDescriptor>,
    #[serde(default, with = "base64_opt")]
    pub wordpress_package: Option<Vec<u8>>,
    #[serde(default, with = "base64_opt")]
    pub sqlite_integration_package: Option<Vec<u8>>,
    pub first_process_id: u64,
    pub process_id_space_length: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub trace: bool,
    /// Host path of a SQL dump seeding the database of a fresh install.
    #[serde(default)]
    pub data_sql_path: Option<PathBuf>,
}

fn default_php_version() -> String {
    defaults::PHP_VERSION.to_string()
}

impl BootParameters {
    /// Parameters with no packages, no mounts and a single-id process range.
    pub fn new(absolute_url: impl Into<String>) -> Self {
        Self {
            wp_version: None,
            php_version: default_php_version(),
            absolute_url: absolute_url.into(),
            mounts_before_wp_install: Vec::new(),
            mounts_after_wp_install: Vec::new(),
            wordpress_package: None,
            sqlite_integration_package: None,
            first_process_id: 0,
            process_id_space_length: 1,
            follow_symlinks: false,
            trace: false,
            data_sql_path: None,
        }
    }

    /// Check the invariants a boot relies on.
    pub fn validate(&self) -> PressboxResult<()> {
        if self.absolute_url.trim().is_empty() {
            return Err(PressboxError::Config("absoluteUrl must not be empty".into()));
        }
        if self.process_id_space_length == 0 {
            return Err(PressboxError::Config(
                "processIdSpaceLength must be at least 1".into(),
            ));
        }
        if self
            .first_process_id
            .checked_add(self.process_id_space_length - 1)
            .is_none()
        {
            return Err(PressboxError::Config(format!(
                "process id range starting at {} with length {} overflows",
                self.first_process_id, self.process_id_space_length
            )));
        }
        Ok(())
    }
}

/// HTTP-shaped request addressed to the guest application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    #[serde(default)]
    pub method: Option<String>,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, with = "base64_opt")]
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Method to use, `GET` when none was given.
    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or("GET")
    }
}

/// HTTP-shaped response from the guest application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub http_status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(http_status_code: u16) -> Self {
        Self {
            http_status_code,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// All values of a header, matched case-insensitively.
    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Lock request sent from the worker to the host lock coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    pub path: PathBuf,
    #[serde(default)]
    pub exclusive: bool,
}

/// Unlock request sent from the worker to the host lock coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRequest {
    pub path: PathBuf,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_opt {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
