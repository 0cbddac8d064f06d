//! Fakes shared by unit tests.

use crate::lock::FileLockClient;
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use pressbox_shared::{PressboxError, PressboxResult};
use std::path::Path;
use std::sync::Arc;

/// Lock client that grants everything and records calls.
#[derive(Default)]
pub struct NoopLock {
    pub calls: Mutex<Vec<String>>,
    pub disconnected: bool,
    pub events: Option<Arc<Mutex<Vec<String>>>>,
}

#[async_trait]
impl FileLockClient for NoopLock {
    async fn is_connected(&self) -> PressboxResult<bool> {
        self.calls.lock().push("is_connected".into());
        if let Some(events) = &self.events {
            events.lock().push("lock_gate".into());
        }
        if self.disconnected {
            return Err(PressboxError::Transport("lock coordinator unreachable".into()));
        }
        Ok(true)
    }

    async fn lock_file(&self, path: &Path, exclusive: bool) -> PressboxResult<()> {
        self.calls
            .lock()
            .push(format!("lock {} {}", path.display(), exclusive));
        Ok(())
    }

    async fn unlock_file(&self, path: &Path) -> PressboxResult<()> {
        self.calls.lock().push(format!("unlock {}", path.display()));
        Ok(())
    }
}

/// Build a gzip tarball with every file under a `top/` directory.
pub fn tarball(top: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/{}", top, path), contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}
