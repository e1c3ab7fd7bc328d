//! Command line parsing
//!
//! Uses clap to define the command line interface

use crate::companion::CompanionOptions;
use crate::compat::CompatLayer;
use crate::config::{ATTACH_TIMEOUT_DEFAULT, EA_SETTLE_DELAY, POLL_INTERVAL_DEFAULT};
use crate::debugger::DebuggerBackend;
use crate::orchestrator::LaunchOptions;
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// nsdbg - debug Northstar on Linux
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "nsdbg",
    about = "Launch Titanfall 2 / Northstar under Proton or Wine and attach a debugger",
    version
)]
pub struct Cli {
    /// Debugger to attach to the game
    #[arg(value_enum)]
    pub debugger: DebuggerBackend,

    /// Compatibility layer used to run the game
    #[arg(long, value_enum, default_value_t = CompatLayer::Proton)]
    pub compat: CompatLayer,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Start the EA Desktop app if it is not running
    #[arg(long = "with-ea")]
    pub with_ea: bool,

    /// Keep the EA Desktop app running after the debugger exits
    #[arg(long = "keep-ea", requires = "with_ea")]
    pub keep_ea: bool,

    /// Install EA Desktop into the Wine prefix if needed
    #[arg(long = "install-ea", requires = "with_ea")]
    pub install_ea: bool,

    /// Environment definition file
    #[arg(long = "env-file", value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Executable to launch (relative to the game directory)
    #[arg(long, value_name = "PATH")]
    pub target: Option<PathBuf>,

    /// Process name to wait for (defaults to the executable's file name)
    #[arg(long = "process-name", value_name = "NAME")]
    pub process_name: Option<String>,

    /// Script passed to the debugger
    #[arg(long = "debugger-config", value_name = "PATH")]
    pub debugger_config: Option<PathBuf>,

    /// Process table poll interval in milliseconds
    #[arg(
        long = "poll-interval-ms",
        value_name = "MS",
        default_value_t = POLL_INTERVAL_DEFAULT.as_millis() as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_ms: u64,

    /// Seconds to wait for the game process before giving up
    #[arg(
        long = "attach-timeout",
        value_name = "SECS",
        default_value_t = ATTACH_TIMEOUT_DEFAULT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub attach_timeout: u64,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn try_parse_args_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args)
    }

    pub fn launch_options(&self) -> LaunchOptions {
        let mut options = LaunchOptions::new(self.compat, self.debugger);
        options.env_file = self.env_file.clone();
        options.target = self.target.clone();
        options.process_name = self.process_name.clone();
        options.debugger_config = self.debugger_config.clone();
        options.poll_interval = Duration::from_millis(self.poll_interval_ms);
        options.attach_timeout = Duration::from_secs(self.attach_timeout);
        options.companion = self.with_ea.then(|| CompanionOptions {
            install: self.install_ea,
            keep_alive: self.keep_ea,
            settle: EA_SETTLE_DELAY,
        });
        options
    }
}
