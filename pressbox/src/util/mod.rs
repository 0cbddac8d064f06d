mod binary;
mod logging;
mod process;

pub use binary::find_binary;
pub use logging::init_logging_for;
pub use process::{is_process_alive, kill_process};
