//! Applies mount descriptors to a runtime instance.

use crate::guest::{GuestRuntime, HostBinding};
use pressbox_shared::{MountDescriptor, PressboxResult};

/// Apply `mounts` to `runtime` in order.
///
/// Each guest path is created first (creating an existing directory is fine),
/// then bound to its host location. Duplicate guest paths are not rejected;
/// the descriptor applied last wins. The first failing step stops the loop.
pub fn apply_mounts(runtime: &dyn GuestRuntime, mounts: &[MountDescriptor]) -> PressboxResult<()> {
    for mount in mounts {
        tracing::debug!(
            process_id = runtime.process_id(),
            host_path = %mount.host_path.display(),
            vfs_path = %mount.vfs_path,
            "Applying mount"
        );
        runtime.mkdir(&mount.vfs_path)?;
        runtime.mount(&mount.vfs_path, HostBinding::new(&mount.host_path))?;
    }
    Ok(())
}
