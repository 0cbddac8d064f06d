//! Pressbox host: spawns out-of-process WordPress playground workers and
//! talks to them.
//!
//! ## Architecture
//!
//! ```text
//! PressboxRuntime ──> CachedDownloader ──> <home>/cache
//!        │
//!        └──> Playground ──> Supervisor ──spawn──> pressbox-worker
//!                  │              │                    │
//!                  │              └─ file_lock ────────┤ (FileLockService)
//!                  └─ request / follow_redirects ──────┘ (runtime channel)
//! ```

pub mod download;
pub mod lock;
pub mod playground;
pub mod relay;
pub mod runtime;
pub mod supervisor;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use download::{CachedDownloader, CachedFile, Fetcher, HttpFetcher, cache_key_for};
pub use lock::{FileLockManager, FileLockService};
pub use playground::{Playground, PreferredVersions, SharedInit, shared_playground};
pub use relay::{RequestHandler, follow_redirects};
pub use runtime::{
    FilesystemLayout, PlaygroundOptions, PressboxOptions, PressboxRuntime, SupervisorOptions,
};
pub use supervisor::{
    ProcessController, Supervisor, WorkerController, WorkerHandle, WorkerId, WorkerProcess,
    WorkerLaunch, WorkerState, WorkerStdio,
};
pub use util::init_logging_for;

pub use pressbox_shared::{
    BootParameters, HttpRequest, HttpResponse, MountDescriptor, PressboxError, PressboxResult,
};
