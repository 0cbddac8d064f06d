//! Liveness checks and signals for worker processes.

/// Kill a process with SIGKILL.
///
/// # Returns
/// * `true` - Process was killed or is already gone
/// * `false` - Failed to kill (permission denied)
pub fn kill_process(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, libc::SIGKILL) == 0 || !is_process_alive(pid) }
}

/// Check whether a process exists, using the null signal.
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}
