//! Unpacks gzip tarball packages into a guest runtime.

use crate::guest::GuestRuntime;
use flate2::read::GzDecoder;
use pressbox_shared::{PressboxError, PressboxResult};
use std::io::Read;
use std::path::{Component, Path};
use tar::{Archive, EntryType};

/// Extract `bytes` under `dest`, dropping the first path component of every
/// entry (the archive's top-level directory). Returns the number of files
/// written.
pub(super) fn install_package(
    runtime: &dyn GuestRuntime,
    name: &str,
    bytes: &[u8],
    dest: &str,
) -> PressboxResult<usize> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let entries = archive.entries().map_err(|e| invalid(name, e))?;

    runtime.mkdir(dest)?;
    let mut files = 0;

    for entry in entries {
        let mut entry = entry.map_err(|e| invalid(name, e))?;
        let path = entry.path().map_err(|e| invalid(name, e))?.into_owned();
        let Some(relative) = strip_top_level(&path) else {
            continue;
        };
        let target = format!("{}/{}", dest.trim_end_matches('/'), relative);

        match entry.header().entry_type() {
            EntryType::Directory => runtime.mkdir(&target)?,
            EntryType::Regular | EntryType::Continuous => {
                if let Some((parent, _)) = target.rsplit_once('/') {
                    if !parent.is_empty() {
                        runtime.mkdir(parent)?;
                    }
                }
                let mut contents = Vec::with_capacity(entry.size() as usize);
                entry
                    .read_to_end(&mut contents)
                    .map_err(|e| invalid(name, e))?;
                runtime.write_file(&target, &contents)?;
                files += 1;
            }
            other => {
                tracing::trace!(package = name, path = %path.display(), ?other, "Skipping archive entry");
            }
        }
    }

    Ok(files)
}

/// `wordpress/wp-includes/version.php` → `wp-includes/version.php`.
/// Entries that escape the archive root, or are the root itself, are skipped.
fn strip_top_level(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components().skip(1) {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn invalid(name: &str, e: std::io::Error) -> PressboxError {
    PressboxError::Boot(format!("package {} is not a valid gzip tarball: {}", name, e))
}
