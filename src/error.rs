//! Error handling for the launch-and-attach flow
//!
//! Every external step (config lookup, spawns, polling, the debugger itself)
//! reports through [`LaunchError`] so `main` can print one message and pick an
//! exit code.

use crate::orchestrator::Stage;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("environment definition not found (searched: {})", display_paths(.searched))]
    ConfigurationMissing { searched: Vec<PathBuf> },

    #[error("invalid environment definition {}: {message}", .path.display())]
    InvalidConfiguration { path: PathBuf, message: String },

    #[error("compatibility layer not found: {0}")]
    CompatLayerNotFound(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("process '{name}' did not appear within {}s", .waited.as_secs())]
    ProcessNotFound { name: String, waited: Duration },

    #[error("interrupted")]
    Cancelled,

    #[error("failed to read process table: {0}")]
    ProcessTable(String),

    #[error("debugger executable not found: {}", .0.display())]
    DebuggerNotFound(PathBuf),

    #[error("failed to download debugger: {0}")]
    DebuggerDownload(String),

    #[error("debugger config not found: {}", .0.display())]
    DebuggerConfigMissing(PathBuf),

    #[error("debugger exited unsuccessfully ({status})")]
    DebuggerFailed { status: ExitStatus },

    #[error("EA Desktop unavailable: {0}")]
    CompanionUnavailable(String),

    #[error("invalid stage transition {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Process,
    Debugger,
    Companion,
    Interrupted,
    Internal,
}

impl ErrorCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            ErrorCategory::Config => "Configuration",
            ErrorCategory::Process => "Process",
            ErrorCategory::Debugger => "Debugger",
            ErrorCategory::Companion => "Companion",
            ErrorCategory::Interrupted => "Interrupted",
            ErrorCategory::Internal => "Internal",
        }
    }
}

impl LaunchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LaunchError::ConfigurationMissing { .. }
            | LaunchError::InvalidConfiguration { .. }
            | LaunchError::CompatLayerNotFound(_) => ErrorCategory::Config,
            LaunchError::Spawn { .. }
            | LaunchError::ProcessNotFound { .. }
            | LaunchError::ProcessTable(_)
            | LaunchError::Io(_) => ErrorCategory::Process,
            LaunchError::DebuggerNotFound(_)
            | LaunchError::DebuggerDownload(_)
            | LaunchError::DebuggerConfigMissing(_)
            | LaunchError::DebuggerFailed { .. } => ErrorCategory::Debugger,
            LaunchError::CompanionUnavailable(_) => ErrorCategory::Companion,
            LaunchError::Cancelled => ErrorCategory::Interrupted,
            LaunchError::InvalidTransition { .. } => ErrorCategory::Internal,
        }
    }

    /// Process exit code for this failure. Everything is fatal.
    pub fn exit_code(&self) -> u8 {
        match self {
            LaunchError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            LaunchError::ConfigurationMissing { .. } => format!(
                "{}\nCreate one or point to it with --env-file / ${}.",
                self,
                crate::config::ENV_FILE_ENV
            ),
            LaunchError::DebuggerNotFound(_) | LaunchError::DebuggerDownload(_) => format!(
                "{}\nDownload x64dbg manually and set [debugger].x64dbg in the environment definition.",
                self
            ),
            _ => self.to_string(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type LaunchResult<T> = Result<T, LaunchError>;
