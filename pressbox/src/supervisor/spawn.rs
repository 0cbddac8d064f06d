//! Worker subprocess spawning.

use super::{WorkerController, WorkerLaunch, WorkerProcess, WorkerStdio};
use crate::util::kill_process;
use async_trait::async_trait;
use pressbox_shared::constants::env;
use pressbox_shared::{PressboxError, PressboxResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// Spawns the `pressbox-worker` binary with piped stdio.
///
/// stdin/stdout carry the transport. stderr carries the worker's logs,
/// which are relayed into the host's tracing output.
#[derive(Debug, Clone)]
pub struct ProcessController {
    binary: PathBuf,
}

impl ProcessController {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl WorkerController for ProcessController {
    async fn start(
        &self,
        launch: &WorkerLaunch,
    ) -> PressboxResult<(Box<dyn WorkerProcess>, WorkerStdio)> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--site-root").arg(&launch.site_root);
        if let Some(limit) = launch.boot_timeout {
            cmd.arg("--boot-timeout-secs").arg(limit.as_secs().max(1).to_string());
        }

        // Pass RUST_LOG to the worker if set
        if let Ok(rust_log) = std::env::var(env::RUST_LOG) {
            cmd.env(env::RUST_LOG, rust_log);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            let err_msg = format!(
                "failed to spawn worker at {}: {}",
                self.binary.display(),
                e
            );
            tracing::error!("{}", err_msg);
            PressboxError::Spawn(err_msg)
        })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            let _ = child.start_kill();
            return Err(PressboxError::Spawn("worker stdio was not captured".into()));
        };

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "pressbox::worker", worker_pid = pid, "{}", line);
                }
            });
        }

        tracing::debug!(worker_pid = pid, site_root = %launch.site_root.display(), "Spawned worker process");

        Ok((
            Box::new(ChildProcess { child }),
            WorkerStdio {
                reader: Box::new(BufReader::new(stdout)),
                writer: Box::new(stdin),
            },
        ))
    }
}

/// A spawned worker subprocess.
struct ChildProcess {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self, limit: Option<Duration>) -> bool {
        let exited = match limit {
            Some(limit) => tokio::time::timeout(limit, self.child.wait()).await.ok(),
            None => Some(self.child.wait().await),
        };
        match exited {
            Some(Ok(status)) => {
                tracing::debug!(%status, "Worker process exited");
                true
            }
            Some(Err(e)) => {
                tracing::warn!("Failed to wait for worker process: {}", e);
                false
            }
            None => false,
        }
    }

    fn kill(&mut self) {
        if let Some(pid) = self.child.id()
            && !kill_process(pid)
        {
            tracing::warn!(worker_pid = pid, "Failed to kill worker process");
        }
    }
}
