//! Bidirectional RPC endpoint over a line-oriented transport.
//!
//! Each side of a worker transport owns one [`Endpoint`]. A side *exposes*
//! capabilities by registering a [`Service`] for a [`Channel`], and
//! *consumes* the peer's capabilities through a [`RemoteHandle`]. Calls in
//! both directions are multiplexed over the same transport and may be in
//! flight at the same time.
//!
//! ## Architecture
//!
//! ```text
//! reader task ──┬── Reply  → pending[id] (oneshot)
//!               ├── Call   → services[channel] → spawned handler → outbound
//!               │            (parked until exposed)
//!               └── Error / EOF → close, fail all pending
//!
//! callers ──→ outbound (mpsc) ──→ writer task ──→ transport
//! ```

use crate::errors::{PressboxError, PressboxResult, RemoteError};
use crate::protocol::{Channel, Frame};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// A capability exposed to the peer.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Handle one call. `params` is `null` when the caller sent none.
    async fn call(&self, method: &str, params: Value) -> PressboxResult<Value>;
}

/// Why an endpoint stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Local side closed the endpoint.
    Local,
    /// Peer closed its end of the transport.
    PeerClosed,
    /// The peer reported a fatal error frame.
    PeerError(String),
    /// Reading from or writing to the transport failed.
    Broken(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Local => f.write_str("endpoint closed"),
            CloseReason::PeerClosed => f.write_str("peer closed the transport"),
            CloseReason::PeerError(message) => write!(f, "peer failed: {}", message),
            CloseReason::Broken(message) => write!(f, "transport broken: {}", message),
        }
    }
}

type PendingReply = oneshot::Sender<Result<Value, RemoteError>>;

struct ParkedCall {
    id: u64,
    method: String,
    params: Value,
}

#[derive(Default)]
struct Registry {
    services: HashMap<Channel, Arc<dyn Service>>,
    parked: HashMap<Channel, Vec<ParkedCall>>,
}

struct EndpointInner {
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    pending: Mutex<HashMap<u64, PendingReply>>,
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    closed: watch::Sender<Option<CloseReason>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

/// One side of a worker transport. Cheap to clone.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("closed", &*self.inner.closed.borrow())
            .finish()
    }
}

impl Endpoint {
    /// Start reader and writer tasks over an already-established transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(None);

        let inner = Arc::new(EndpointInner {
            outbound: Mutex::new(Some(tx)),
            pending: Mutex::new(HashMap::new()),
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            closed,
            writer: Mutex::new(None),
        });

        let writer_task = tokio::spawn(write_loop(Arc::clone(&inner), rx, writer));
        *inner.writer.lock() = Some(writer_task);
        tokio::spawn(read_loop(Arc::clone(&inner), reader));

        Self { inner }
    }

    /// Expose a capability on `channel`. Calls parked for it are dispatched now.
    pub fn expose(&self, channel: Channel, service: Arc<dyn Service>) {
        let parked = {
            let mut registry = self.inner.registry.lock();
            if self.is_closed() {
                tracing::debug!(%channel, "Not exposing service on a closed endpoint");
                return;
            }
            registry.services.insert(channel, Arc::clone(&service));
            registry.parked.remove(&channel).unwrap_or_default()
        };

        tracing::debug!(%channel, parked = parked.len(), "Exposed service");

        for call in parked {
            dispatch(
                Arc::clone(&self.inner),
                Arc::clone(&service),
                channel,
                call,
            );
        }
    }

    /// Handle for calling the capability the peer exposes on `channel`.
    pub fn remote(&self, channel: Channel) -> RemoteHandle {
        RemoteHandle {
            endpoint: self.clone(),
            channel,
        }
    }

    /// Send a raw frame, e.g. the readiness handshake.
    pub fn send(&self, frame: Frame) -> PressboxResult<()> {
        send_frame(&self.inner, frame)
    }

    /// Call `method` on the peer's `channel` capability.
    pub async fn call<P, R>(&self, channel: Channel, method: &str, params: &P) -> PressboxResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        self.inner.pending.lock().insert(id, tx);

        // Close may have drained pending before our insert landed.
        if let Some(reason) = self.close_reason() {
            self.inner.pending.lock().remove(&id);
            return Err(PressboxError::Transport(reason.to_string()));
        }

        let frame = Frame::Call {
            id,
            channel,
            method: method.to_string(),
            params,
        };
        if let Err(e) = send_frame(&self.inner, frame) {
            self.inner.pending.lock().remove(&id);
            return Err(e);
        }

        let reply = rx.await.map_err(|_| {
            PressboxError::Transport(
                self.close_reason()
                    .unwrap_or(CloseReason::Local)
                    .to_string(),
            )
        })?;

        let value = reply.map_err(PressboxError::from)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Reason the endpoint closed, if it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.closed.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.borrow().is_some()
    }

    /// Resolve once the endpoint is closed, for any reason.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.inner.closed.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return CloseReason::Local;
            }
        }
    }

    /// Close the endpoint: flush queued frames, then shut the write side.
    ///
    /// Outstanding calls fail with a transport error. Idempotent.
    pub async fn close(&self) {
        mark_closed(&self.inner, CloseReason::Local);

        let writer = self.inner.writer.lock().take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
    }
}

/// Typed handle to one remote capability.
#[derive(Debug, Clone)]
pub struct RemoteHandle {
    endpoint: Endpoint,
    channel: Channel,
}

impl RemoteHandle {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub async fn call<P, R>(&self, method: &str, params: &P) -> PressboxResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.endpoint.call(self.channel, method, params).await
    }
}

fn send_frame(inner: &EndpointInner, frame: Frame) -> PressboxResult<()> {
    let outbound = inner.outbound.lock();
    let tx = outbound
        .as_ref()
        .ok_or_else(|| PressboxError::Transport("endpoint closed".into()))?;
    tx.send(frame)
        .map_err(|_| PressboxError::Transport("writer task stopped".into()))
}

/// Record the close reason (first one wins) and fail everything in flight.
fn mark_closed(inner: &EndpointInner, reason: CloseReason) {
    let first = inner.closed.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason.clone());
        true
    });

    // Exposed services go with the transport. Handlers still running keep
    // their own reference until they finish.
    let released = std::mem::take(&mut *inner.registry.lock());
    drop(released);

    // Dropping the sender lets the writer drain its queue and exit.
    inner.outbound.lock().take();

    let pending: Vec<PendingReply> = inner.pending.lock().drain().map(|(_, tx)| tx).collect();
    if first {
        tracing::debug!(reason = %reason, failed_calls = pending.len(), "Endpoint closed");
    }
    for tx in pending {
        let _ = tx.send(Err(RemoteError::from(PressboxError::Transport(
            reason.to_string(),
        ))));
    }
}

fn dispatch(inner: Arc<EndpointInner>, service: Arc<dyn Service>, channel: Channel, call: ParkedCall) {
    tokio::spawn(async move {
        let ParkedCall { id, method, params } = call;
        tracing::trace!(%channel, id, method = %method, "Dispatching call");

        let result = service
            .call(&method, params)
            .await
            .map_err(|e| RemoteError::from(&e));

        if let Err(ref e) = result {
            tracing::debug!(%channel, id, method = %method, code = %e.code, "Call failed: {}", e.message);
        }

        if send_frame(&inner, Frame::Reply { id, channel, result }).is_err() {
            tracing::debug!(%channel, id, "Reply dropped, endpoint closed");
        }
    });
}

fn handle_frame(inner: &Arc<EndpointInner>, frame: Frame) {
    match frame {
        Frame::Reply { id, result, .. } => match inner.pending.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => tracing::warn!(id, "Reply for unknown call"),
        },
        Frame::Call {
            id,
            channel,
            method,
            params,
        } => {
            let call = ParkedCall { id, method, params };
            let service = {
                let mut registry = inner.registry.lock();
                match registry.services.get(&channel) {
                    Some(service) => Some((Arc::clone(service), call)),
                    None => {
                        tracing::debug!(%channel, id, "Parking call until service is exposed");
                        registry.parked.entry(channel).or_default().push(call);
                        None
                    }
                }
            };
            if let Some((service, call)) = service {
                dispatch(Arc::clone(inner), service, channel, call);
            }
        }
        Frame::Ready => tracing::debug!("Ignoring repeated readiness message"),
        Frame::Error { message } => {
            tracing::error!(error = %message, "Peer reported a fatal error");
            mark_closed(inner, CloseReason::PeerError(message));
        }
    }
}

async fn read_loop<R>(inner: Arc<EndpointInner>, reader: R)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let mut lines = reader.lines();
    loop {
        if inner.closed.borrow().is_some() {
            break;
        }
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match Frame::decode(&line) {
                    Ok(frame) => handle_frame(&inner, frame),
                    Err(e) => tracing::warn!("Skipping line: {}", e),
                }
            }
            Ok(None) => {
                mark_closed(&inner, CloseReason::PeerClosed);
                break;
            }
            Err(e) => {
                mark_closed(&inner, CloseReason::Broken(e.to_string()));
                break;
            }
        }
    }
}

async fn write_loop<W>(inner: Arc<EndpointInner>, mut rx: mpsc::UnboundedReceiver<Frame>, mut writer: W)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(frame) = rx.recv().await {
        let line = match frame.encode() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to encode frame: {}", e);
                continue;
            }
        };
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            mark_closed(&inner, CloseReason::Broken(e.to_string()));
            break;
        }
    }
    let _ = writer.shutdown().await;
}
