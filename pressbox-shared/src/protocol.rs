//! Wire protocol between the host and a worker.
//!
//! Frames are newline-delimited JSON objects tagged by `type`. The host writes
//! to the worker's stdin, the worker writes to its stdout.
//!
//! ```text
//! worker → host   {"type":"worker-script-initialized"}
//! host → worker   {"type":"call","id":1,"channel":"runtime","method":"boot","params":{..}}
//! worker → host   {"type":"call","id":1,"channel":"file_lock","method":"is_connected","params":null}
//! host → worker   {"type":"reply","id":1,"channel":"file_lock","result":{"Ok":true}}
//! worker → host   {"type":"reply","id":1,"channel":"runtime","result":{"Ok":null}}
//! ```
//!
//! Call ids are scoped per direction, so both sides may use the same id at once.

use crate::errors::{PressboxError, PressboxResult, RemoteError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability channel multiplexed over one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Boot/runtime capability living inside the worker.
    Runtime,
    /// File-lock coordination capability living in the host.
    FileLock,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Runtime => f.write_str("runtime"),
            Channel::FileLock => f.write_str("file_lock"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Readiness handshake, sent once by the worker before anything else.
    #[serde(rename = "worker-script-initialized")]
    Ready,
    /// Fatal error raised by the execution unit itself.
    Error { message: String },
    Call {
        id: u64,
        channel: Channel,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Reply {
        id: u64,
        channel: Channel,
        result: Result<Value, RemoteError>,
    },
}

impl Frame {
    /// Encode as a single line, newline included.
    pub fn encode(&self) -> PressboxResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> PressboxResult<Self> {
        serde_json::from_str(line.trim_end()).map_err(|e| {
            PressboxError::Transport(format!("malformed frame {:?}: {}", truncate(line), e))
        })
    }
}

fn truncate(line: &str) -> &str {
    const MAX: usize = 120;
    if line.len() <= MAX {
        return line;
    }
    let mut end = MAX;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}
