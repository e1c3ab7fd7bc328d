use crate::config::TERMINATE_GRACE;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io;
use std::thread;
use tokio::process::Command;
use tracing::debug;

/// Put background children in their own process group
///
/// The group id equals the child's pid, so the whole wine process tree can
/// be signalled at once with [`terminate_process_group`].
pub fn prepare_command(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if set_process_group() != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Terminate a process group
///
/// SIGTERM first, SIGKILL for whatever is left after the grace period. The
/// group leader may already be gone while wine children keep running, so the
/// group is signalled rather than the leader's pid.
pub fn terminate_process_group(pgid: u32) {
    let group = to_pid(pgid);
    if let Err(errno) = signal::killpg(group, Signal::SIGTERM) {
        debug!("pgid={} not signalled: {}", pgid, errno);
        return;
    }

    thread::sleep(TERMINATE_GRACE);
    if !group_alive(pgid) {
        debug!("pgid={} terminated", pgid);
        return;
    }

    if signal::killpg(group, Signal::SIGKILL).is_ok() {
        debug!("pgid={} sent SIGKILL", pgid);
    }
}

fn group_alive(pgid: u32) -> bool {
    matches!(signal::killpg(to_pid(pgid), None), Ok(()) | Err(Errno::EPERM))
}

fn to_pid(pid: u32) -> Pid {
    Pid::from_raw(pid as libc::pid_t)
}

/// Encapsulates unsafe setpgid call
unsafe fn set_process_group() -> libc::c_int {
    unsafe { libc::setpgid(0, 0) }
}
