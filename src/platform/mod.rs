//! Platform-specific process helpers

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::{prepare_command, terminate_process_group};

#[cfg(not(unix))]
mod fallback {
    use tokio::process::Command;

    pub fn prepare_command(_cmd: &mut Command) {}

    pub fn terminate_process_group(_pgid: u32) {}
}

#[cfg(not(unix))]
pub use fallback::{prepare_command, terminate_process_group};
