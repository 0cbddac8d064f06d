//! Readiness handshake on a freshly spawned worker's transport.

use pressbox_shared::{Endpoint, Frame, PressboxError, PressboxResult};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};

/// Wait for the readiness frame, then start the RPC endpoint on the same
/// transport.
///
/// An error frame, EOF or the optional timeout before readiness is a spawn
/// failure. Lines that are not frames are skipped.
pub async fn establish<R, W>(
    mut reader: R,
    writer: W,
    ready_timeout: Option<Duration>,
) -> PressboxResult<Endpoint>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let wait = wait_ready(&mut reader);
    match ready_timeout {
        Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
            PressboxError::Spawn(format!("no readiness message within {:?}", limit))
        })??,
        None => wait.await?,
    }
    Ok(Endpoint::start(reader, writer))
}

async fn wait_ready<R>(reader: &mut R) -> PressboxResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| PressboxError::Spawn(format!("reading worker output: {}", e)))?;
        if read == 0 {
            return Err(PressboxError::Spawn(
                "worker exited before signalling readiness".into(),
            ));
        }
        if line.trim().is_empty() {
            continue;
        }
        match Frame::decode(&line) {
            Ok(Frame::Ready) => return Ok(()),
            Ok(Frame::Error { message }) => return Err(PressboxError::Spawn(message)),
            Ok(other) => tracing::warn!(frame = ?other, "Frame before readiness, ignoring"),
            Err(_) => tracing::debug!(line = line.trim_end(), "Skipping non-protocol output"),
        }
    }
}
