//! Process table lookups
//!
//! Wine processes show up in the Linux process table under their Windows
//! executable name, truncated to the kernel's 15-byte `comm` limit. Lookups
//! here match on that name.
//!
//! Platform strategy:
//! - Linux/macOS: psutil
//! - elsewhere: unsupported

use crate::config::COMM_MAX_LEN;
use crate::error::{LaunchError, LaunchResult};
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
}

pub trait ProcessTable: Send + Sync {
    /// Current processes, in table order
    fn snapshot(&self) -> LaunchResult<Vec<ProcessEntry>>;

    /// First process whose name matches `name`
    fn find_by_name(&self, name: &str) -> LaunchResult<Option<u32>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .find(|entry| name_matches(&entry.name, name))
            .map(|entry| entry.pid))
    }

    fn any_running(&self, names: &[&str]) -> LaunchResult<bool> {
        Ok(self
            .snapshot()?
            .iter()
            .any(|entry| names.iter().any(|name| name_matches(&entry.name, name))))
    }
}

/// Compare a process table name against an executable name
///
/// Case-insensitive, and a 15-byte name matches any longer executable name it
/// is a prefix of.
pub fn name_matches(process_name: &str, executable: &str) -> bool {
    if process_name.is_empty() {
        return false;
    }
    if process_name.eq_ignore_ascii_case(executable) {
        return true;
    }
    process_name.len() == COMM_MAX_LEN
        && executable.len() > COMM_MAX_LEN
        && executable.as_bytes()[..COMM_MAX_LEN].eq_ignore_ascii_case(process_name.as_bytes())
}

/// Poll `table` until a process named `name` appears.
///
/// Checks immediately, then every `poll_interval`, giving up after `timeout`
/// with [`LaunchError::ProcessNotFound`].
pub async fn resolve_process_id<T>(
    table: &T,
    name: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> LaunchResult<u32>
where
    T: ProcessTable + ?Sized,
{
    let poll = async {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            match table.find_by_name(name)? {
                Some(pid) => {
                    debug!("found {} pid={} after {} poll(s)", name, pid, attempts);
                    return Ok::<u32, LaunchError>(pid);
                }
                None => trace!("{} not running yet (poll {})", name, attempts),
            }
            tokio::time::sleep(poll_interval).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(result) => result,
        Err(_) => Err(LaunchError::ProcessNotFound {
            name: name.to_string(),
            waited: timeout,
        }),
    }
}

/// Process table of the running system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

#[cfg(unix)]
impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> LaunchResult<Vec<ProcessEntry>> {
        let processes = psutil::process::processes()
            .map_err(|e| LaunchError::ProcessTable(e.to_string()))?;

        // Processes exiting mid-scan are skipped
        Ok(processes
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|process| {
                let name = process.name().ok()?;
                Some(ProcessEntry {
                    pid: process.pid(),
                    name,
                })
            })
            .collect())
    }
}

#[cfg(not(unix))]
impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> LaunchResult<Vec<ProcessEntry>> {
        Err(LaunchError::ProcessTable("unsupported platform".to_string()))
    }
}
