//! In-process stand-ins for worker processes.

use crate::supervisor::{WorkerController, WorkerLaunch, WorkerProcess, WorkerStdio};
use async_trait::async_trait;
use parking_lot::Mutex;
use pressbox_shared::{Channel, Endpoint, Frame, PressboxResult, Service};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader, duplex, split};

/// What the fake worker does once started.
#[derive(Clone)]
pub enum Script {
    /// Signal readiness and serve `runtime` on the runtime channel.
    Ready(Arc<dyn Service>),
    /// Report a fatal error instead of readiness.
    Error(String),
    /// Close the transport without a word.
    Exit,
}

#[derive(Default)]
pub struct ProcessLog {
    pub killed: AtomicBool,
    pub waited: AtomicBool,
}

impl ProcessLog {
    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn waited(&self) -> bool {
        self.waited.load(Ordering::SeqCst)
    }
}

struct FakeProcess {
    log: Arc<ProcessLog>,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self, _limit: Option<Duration>) -> bool {
        self.log.waited.store(true, Ordering::SeqCst);
        true
    }

    fn kill(&mut self) {
        self.log.killed.store(true, Ordering::SeqCst);
    }
}

/// Controller running a scripted worker on an in-memory transport.
pub struct FakeController {
    script: Script,
    pub log: Arc<ProcessLog>,
    /// Answer of the host lock coordinator to the worker's `is_connected`.
    pub lock_connected: Arc<Mutex<Option<bool>>>,
    pub launches: Mutex<Vec<WorkerLaunch>>,
}

impl FakeController {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: Arc::default(),
            lock_connected: Arc::default(),
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Wait until the fake worker heard back from the lock coordinator.
    pub async fn lock_answer(&self) -> Option<bool> {
        for _ in 0..100 {
            if let Some(answer) = *self.lock_connected.lock() {
                return Some(answer);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}

#[async_trait]
impl WorkerController for FakeController {
    async fn start(
        &self,
        launch: &WorkerLaunch,
    ) -> PressboxResult<(Box<dyn WorkerProcess>, WorkerStdio)> {
        self.launches.lock().push(launch.clone());

        let (host, worker) = duplex(256 * 1024);
        let (worker_read, mut worker_write) = split(worker);
        let script = self.script.clone();
        let lock_connected = Arc::clone(&self.lock_connected);

        tokio::spawn(async move {
            match script {
                Script::Ready(runtime) => {
                    let line = Frame::Ready.encode().unwrap();
                    worker_write.write_all(line.as_bytes()).await.unwrap();
                    let endpoint = Endpoint::start(BufReader::new(worker_read), worker_write);
                    endpoint.expose(Channel::Runtime, runtime);
                    let connected: PressboxResult<bool> = endpoint
                        .remote(Channel::FileLock)
                        .call("is_connected", &Value::Null)
                        .await;
                    *lock_connected.lock() = Some(connected.unwrap_or(false));
                    endpoint.closed().await;
                }
                Script::Error(message) => {
                    let line = Frame::Error { message }.encode().unwrap();
                    worker_write.write_all(line.as_bytes()).await.unwrap();
                    let line = Frame::Ready.encode().unwrap();
                    worker_write.write_all(line.as_bytes()).await.unwrap();
                }
                Script::Exit => drop(worker_write),
            }
        });

        let (host_read, host_write) = split(host);
        Ok((
            Box::new(FakeProcess {
                log: Arc::clone(&self.log),
            }),
            WorkerStdio {
                reader: Box::new(BufReader::new(host_read)),
                writer: Box::new(host_write),
            },
        ))
    }
}
