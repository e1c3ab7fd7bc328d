//! EA Desktop companion app
//!
//! Titanfall 2 refuses to start without the EA app. Under Proton it is
//! started through Steam's `link2ea` handler; under Wine it is run straight
//! from the prefix, optionally after running the installer shipped with the
//! game.

use crate::compat::{CompatLayer, CompatRuntime};
use crate::config::{
    EA_DESKTOP_DIR, EA_DESKTOP_EXE, EA_INSTALLER, EA_LINK_URL, EA_PROCESS_NAMES, EA_SETTLE_DELAY,
};
use crate::error::{LaunchError, LaunchResult};
use crate::process_table::ProcessTable;
use crate::runner::ProcessRunner;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionOptions {
    /// Run the bundled installer when the app is missing from a Wine prefix
    pub install: bool,
    /// Leave the app running after the debugger exits
    pub keep_alive: bool,
    /// Wait after starting through Steam
    pub settle: Duration,
}

impl Default for CompanionOptions {
    fn default() -> Self {
        Self {
            install: false,
            keep_alive: false,
            settle: EA_SETTLE_DELAY,
        }
    }
}

/// Outcome of [`ensure_running`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanionState {
    AlreadyRunning,
    Started { pid: u32 },
}

impl CompanionState {
    /// Pid to clean up after the session, if we started it
    pub fn started_pid(&self) -> Option<u32> {
        match self {
            CompanionState::Started { pid } => Some(*pid),
            CompanionState::AlreadyRunning => None,
        }
    }
}

/// Start the EA app unless one is already running
pub async fn ensure_running<R, T>(
    runtime: &CompatRuntime,
    runner: &R,
    table: &T,
    options: &CompanionOptions,
) -> LaunchResult<CompanionState>
where
    R: ProcessRunner + ?Sized,
    T: ProcessTable + ?Sized,
{
    if table.any_running(EA_PROCESS_NAMES)? {
        debug!("EA App already running, not starting it again");
        return Ok(CompanionState::AlreadyRunning);
    }

    let pid = match runtime.layer() {
        CompatLayer::Proton => start_proton(runtime, runner, options).await?,
        CompatLayer::Wine => start_wine(runtime, runner, options).await?,
    };
    Ok(CompanionState::Started { pid })
}

async fn start_proton<R>(
    runtime: &CompatRuntime,
    runner: &R,
    options: &CompanionOptions,
) -> LaunchResult<u32>
where
    R: ProcessRunner + ?Sized,
{
    if options.install {
        warn!("Not installing EA Desktop into Proton prefix");
    }

    // link2ea authenticates through Steam
    let pid = runner.spawn(&runtime.spec("steam.exe", [EA_LINK_URL])).await?;
    info!("Starting EA App via Steam (pid={})", pid);
    Ok(pid)
}

async fn start_wine<R>(
    runtime: &CompatRuntime,
    runner: &R,
    options: &CompanionOptions,
) -> LaunchResult<u32>
where
    R: ProcessRunner + ?Sized,
{
    let prefix = runtime
        .prefix()
        .ok_or_else(|| LaunchError::CompanionUnavailable("unable to find Wine prefix".into()))?;
    let installed_exe = prefix_exe_path(&prefix);

    if !installed_exe.is_file() {
        if !options.install {
            return Err(LaunchError::CompanionUnavailable(format!(
                "not installed at {} (pass --install-ea to install it)",
                installed_exe.display()
            )));
        }

        let installer = join_all(runtime.game_dir(), EA_INSTALLER);
        info!("Installing EA Desktop");
        // Foreground, so Ctrl-C in the terminal reaches the installer too
        let status = runner
            .run(
                &runtime
                    .spec(installer.into_os_string(), Vec::<String>::new())
                    .interactive(),
            )
            .await?;
        if !status.success() {
            warn!("EA Desktop installer exited with {}", status);
        }

        if !installed_exe.is_file() {
            return Err(LaunchError::CompanionUnavailable(
                "failed to install EA Desktop".into(),
            ));
        }
    }

    let pid = runner
        .spawn(&runtime.spec(windows_exe_path(), Vec::<String>::new()))
        .await?;
    info!("Starting EA App (pid={})", pid);
    Ok(pid)
}

/// Time to give the app before launching the game.
///
/// Only an app just started through Steam needs it.
pub fn settle_delay(
    state: CompanionState,
    layer: CompatLayer,
    options: &CompanionOptions,
) -> Option<Duration> {
    match (state, layer) {
        (CompanionState::Started { .. }, CompatLayer::Proton) => Some(options.settle),
        _ => None,
    }
}

/// Stop the app after the session unless asked to keep it
pub async fn finish<R>(state: CompanionState, runner: &R, options: &CompanionOptions)
where
    R: ProcessRunner + ?Sized,
{
    match state.started_pid() {
        Some(pid) if !options.keep_alive => {
            info!("Stopping EA App (pid={})", pid);
            runner.terminate(pid).await;
        }
        Some(pid) => debug!("Leaving EA App running (pid={})", pid),
        None => {}
    }
}

fn prefix_exe_path(prefix: &Path) -> PathBuf {
    join_all(&prefix.join("drive_c"), EA_DESKTOP_DIR).join(EA_DESKTOP_EXE)
}

/// `C:\Program Files\Electronic Arts\EA Desktop\EA Desktop\EADesktop.exe`
fn windows_exe_path() -> String {
    let mut path = String::from("C:");
    for part in EA_DESKTOP_DIR.iter().chain(std::iter::once(&EA_DESKTOP_EXE)) {
        path.push('\\');
        path.push_str(part);
    }
    path
}

fn join_all(base: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(base.to_path_buf(), |path, part| path.join(part))
}
