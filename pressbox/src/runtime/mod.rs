pub mod core;
pub mod layout;
pub mod options;

pub use core::PressboxRuntime;
pub use layout::FilesystemLayout;
pub use options::{PlaygroundOptions, PressboxOptions, SupervisorOptions};
