use pressbox_shared::{PressboxError, PressboxResult};
use std::path::PathBuf;

/// Locate a companion binary shipped next to the current executable.
///
/// Search order:
/// 1. `env_var`, when set
/// 2. the directory of the current executable
/// 3. its parent, for test binaries living in `target/<profile>/deps/`
pub fn find_binary(name: &str, env_var: &str) -> PressboxResult<PathBuf> {
    if let Some(path) = std::env::var_os(env_var) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        return Err(PressboxError::Config(format!(
            "{} points at {}, which is not a file",
            env_var,
            path.display()
        )));
    }

    let exe = std::env::current_exe()
        .map_err(|e| PressboxError::Config(format!("cannot resolve current executable: {}", e)))?;
    let mut searched = Vec::new();

    if let Some(dir) = exe.parent() {
        searched.push(dir.join(name));
        if dir.file_name().is_some_and(|n| n == "deps") {
            if let Some(parent) = dir.parent() {
                searched.push(parent.join(name));
            }
        }
    }

    searched.into_iter().find(|p| p.is_file()).ok_or_else(|| {
        PressboxError::Config(format!(
            "{} not found next to {}; set {} to its location",
            name,
            exe.display(),
            env_var
        ))
    })
}
