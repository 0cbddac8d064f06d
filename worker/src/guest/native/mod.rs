//! Native guest backend.
//!
//! Serves the guest filesystem view straight from a host site directory.
//! No script interpreter is embedded: static files are answered, script
//! files get `501 Not Implemented`.
//!
//! ```text
//! <site-root>/                     guest "/"
//! <site-root>/wordpress/           guest "/wordpress" (document root)
//! <site-root>/internal/shared/     CA bundle, php.ini
//! <site-root>/.pressbox-install.lock
//! ```

mod archive;
mod framework;
mod runtime;
mod site;

pub use framework::NativeFramework;
pub use runtime::{NativeRuntime, NativeRuntimeLoader};
pub use site::NativeSiteHandler;
