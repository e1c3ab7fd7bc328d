//! nsdbg Library
//!
//! Launches a Windows game under Proton or Wine, waits for it to show up in
//! the process table and attaches a debugger to it.

pub mod cancel;
pub mod commands;
pub mod companion;
pub mod compat;
pub mod config;
pub mod debugger;
pub mod environment;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod platform;
pub mod process_table;
pub mod runner;

// Re-export commonly used types for convenience
pub use cancel::CancelFlag;
pub use compat::CompatLayer;
pub use debugger::DebuggerBackend;
pub use error::{LaunchError, LaunchResult};
pub use orchestrator::{LaunchOptions, Orchestrator, SessionReport, Stage};
pub use process_table::{ProcessTable, SystemProcessTable};
pub use runner::{LaunchSpec, ProcessRunner, TokioRunner};
