//! External process execution
//!
//! Every process nsdbg starts goes through a [`ProcessRunner`], either in the
//! background (target, companion app) or in the foreground (installer,
//! debugger).

use crate::environment::{EnvInjector, EnvMap};
use crate::error::{LaunchError, LaunchResult};
use crate::platform;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Everything needed to start one external process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: EnvMap,
    /// Inherit the terminal (debugger sessions) instead of detaching stdin
    pub interactive: bool,
}

impl LaunchSpec {
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Human readable command line for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str().to_string_lossy().into_owned())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        EnvInjector::inject(&mut command, &self.env);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        if !self.interactive {
            command.stdin(Stdio::null());
            platform::prepare_command(&mut command);
        }
        command
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Start a process without waiting for it; returns its pid
    async fn spawn(&self, spec: &LaunchSpec) -> LaunchResult<u32>;

    /// Start a process and wait for it to exit
    async fn run(&self, spec: &LaunchSpec) -> LaunchResult<ExitStatus>;

    /// Run a process to completion, capturing stdout and stderr
    async fn output(&self, spec: &LaunchSpec) -> LaunchResult<Output>;

    /// Stop a process started by [`ProcessRunner::spawn`]
    async fn terminate(&self, pid: u32);
}

/// Runner backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRunner;

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn spawn(&self, spec: &LaunchSpec) -> LaunchResult<u32> {
        debug!("Running {}", spec.command_line());
        let child = spec.to_command().spawn().map_err(|source| LaunchError::Spawn {
            program: spec.program_name(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| LaunchError::Spawn {
            program: spec.program_name(),
            source: std::io::Error::other("child exited before its pid was read"),
        })?;
        debug!("pid={} started", pid);
        // tokio reaps the dropped child once it exits
        drop(child);
        Ok(pid)
    }

    async fn run(&self, spec: &LaunchSpec) -> LaunchResult<ExitStatus> {
        debug!("Running {} (foreground)", spec.command_line());
        let mut child = spec.to_command().spawn().map_err(|source| LaunchError::Spawn {
            program: spec.program_name(),
            source,
        })?;
        let status = child.wait().await?;
        debug!("{} exited with {}", spec.program_name(), status);
        Ok(status)
    }

    async fn output(&self, spec: &LaunchSpec) -> LaunchResult<Output> {
        debug!("Running {} (captured)", spec.command_line());
        spec.to_command()
            .output()
            .await
            .map_err(|source| LaunchError::Spawn {
                program: spec.program_name(),
                source,
            })
    }

    async fn terminate(&self, pid: u32) {
        tokio::task::spawn_blocking(move || platform::terminate_process_group(pid))
            .await
            .ok();
    }
}
