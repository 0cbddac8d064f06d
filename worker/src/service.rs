//! Runtime capability exposed to the host on the `runtime` channel.

use crate::boot::BootSequencer;
use async_trait::async_trait;
use pressbox_shared::{BootParameters, HttpRequest, PressboxError, PressboxResult, Service};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

pub mod methods {
    pub const IS_CONNECTED: &str = "is_connected";
    pub const BOOT: &str = "boot";
    pub const IS_READY: &str = "is_ready";
    pub const REQUEST: &str = "request";
    pub const DISPOSE: &str = "dispose";
}

pub struct WorkerService {
    sequencer: Arc<BootSequencer>,
}

impl WorkerService {
    pub fn new(sequencer: Arc<BootSequencer>) -> Self {
        Self { sequencer }
    }
}

fn params<T: DeserializeOwned>(method: &str, value: Value) -> PressboxResult<T> {
    serde_json::from_value(value)
        .map_err(|e| PressboxError::Config(format!("invalid parameters for {}: {}", method, e)))
}

#[async_trait]
impl Service for WorkerService {
    async fn call(&self, method: &str, value: Value) -> PressboxResult<Value> {
        match method {
            methods::IS_CONNECTED => Ok(Value::Bool(true)),
            methods::BOOT => {
                let boot: BootParameters = params(method, value)?;
                self.sequencer.boot(boot).await?;
                Ok(Value::Null)
            }
            methods::IS_READY => {
                self.sequencer.wait_ready().await?;
                Ok(Value::Bool(true))
            }
            methods::REQUEST => {
                let request: HttpRequest = params(method, value)?;
                let response = self.sequencer.request(request).await?;
                Ok(serde_json::to_value(response)?)
            }
            methods::DISPOSE => {
                self.sequencer.dispose();
                Ok(Value::Null)
            }
            other => Err(PressboxError::Unsupported(format!(
                "runtime method '{}'",
                other
            ))),
        }
    }
}
