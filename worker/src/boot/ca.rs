//! Host CA bundle handed to the guest.

use std::path::{Path, PathBuf};

const SSL_CERT_FILE: &str = "SSL_CERT_FILE";

const SYSTEM_BUNDLES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem",
    "/etc/ssl/cert.pem",
    "/usr/local/etc/openssl/cert.pem",
];

/// Read the first CA bundle found, `SSL_CERT_FILE` taking precedence.
///
/// Missing bundles are not fatal: the guest gets an empty file and TLS
/// verification inside it fails instead.
pub(crate) async fn load_ca_bundle() -> Vec<u8> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = std::env::var_os(SSL_CERT_FILE) {
        candidates.push(PathBuf::from(path));
    }
    candidates.extend(SYSTEM_BUNDLES.iter().map(PathBuf::from));

    for path in &candidates {
        if let Some(bundle) = read_bundle(path).await {
            tracing::debug!(path = %path.display(), bytes = bundle.len(), "Loaded CA bundle");
            return bundle;
        }
    }

    tracing::warn!("No CA bundle found on this host, guest TLS verification will fail");
    Vec::new()
}

async fn read_bundle(path: &Path) -> Option<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bundle) if !bundle.is_empty() => Some(bundle),
        _ => None,
    }
}
