//! File-lock coordination as seen from inside the worker.
//!
//! The coordinator lives in the host so every worker sharing a cache or site
//! directory goes through the same lock table.

use async_trait::async_trait;
use pressbox_shared::{LockRequest, PressboxResult, RemoteHandle, UnlockRequest};
use std::path::Path;

/// Lock coordinator used by runtime instances and the framework installer.
#[async_trait]
pub trait FileLockClient: Send + Sync {
    /// Resolve once the coordinator is reachable and answering.
    async fn is_connected(&self) -> PressboxResult<bool>;

    async fn lock_file(&self, path: &Path, exclusive: bool) -> PressboxResult<()>;

    async fn unlock_file(&self, path: &Path) -> PressboxResult<()>;
}

/// Client calling the host's file-lock capability over the transport.
#[derive(Debug, Clone)]
pub struct RemoteFileLock {
    remote: RemoteHandle,
}

impl RemoteFileLock {
    pub fn new(remote: RemoteHandle) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl FileLockClient for RemoteFileLock {
    async fn is_connected(&self) -> PressboxResult<bool> {
        self.remote.call("is_connected", &()).await
    }

    async fn lock_file(&self, path: &Path, exclusive: bool) -> PressboxResult<()> {
        let request = LockRequest {
            path: path.to_path_buf(),
            exclusive,
        };
        self.remote.call("lock_file", &request).await
    }

    async fn unlock_file(&self, path: &Path) -> PressboxResult<()> {
        let request = UnlockRequest {
            path: path.to_path_buf(),
        };
        self.remote.call("unlock_file", &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressbox_shared::{Channel, Endpoint, PressboxError, Service};
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::io::{BufReader, duplex, split};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl Service for Recorder {
        async fn call(&self, method: &str, params: Value) -> PressboxResult<Value> {
            self.calls.lock().push((method.to_string(), params));
            match method {
                "is_connected" => Ok(json!(true)),
                "lock_file" | "unlock_file" => Ok(Value::Null),
                other => Err(PressboxError::Unsupported(other.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_remote_lock_calls_host_capability() {
        let (a, b) = duplex(16 * 1024);
        let (a_read, a_write) = split(a);
        let (b_read, b_write) = split(b);
        let host = Endpoint::start(BufReader::new(a_read), a_write);
        let worker = Endpoint::start(BufReader::new(b_read), b_write);

        let recorder = Arc::new(Recorder::default());
        host.expose(Channel::FileLock, recorder.clone());

        let client = RemoteFileLock::new(worker.remote(Channel::FileLock));
        assert!(client.is_connected().await.unwrap());
        client
            .lock_file(&PathBuf::from("/tmp/site.lock"), true)
            .await
            .unwrap();
        client
            .unlock_file(&PathBuf::from("/tmp/site.lock"))
            .await
            .unwrap();

        let calls = recorder.calls.lock().clone();
        let methods: Vec<&str> = calls.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(methods, vec!["is_connected", "lock_file", "unlock_file"]);
        assert_eq!(calls[1].1, json!({"path": "/tmp/site.lock", "exclusive": true}));
    }
}
