//! Types shared by the pressbox host and the pressbox worker.

pub mod constants;
pub mod errors;
pub mod protocol;
pub mod rpc;
pub mod types;

pub use errors::{PressboxError, PressboxResult, RemoteError};
pub use protocol::{Channel, Frame};
pub use rpc::{CloseReason, Endpoint, RemoteHandle, Service};
pub use types::{
    BootParameters, HttpRequest, HttpResponse, LockRequest, MountDescriptor, UnlockRequest,
};
