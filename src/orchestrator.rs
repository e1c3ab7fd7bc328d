//! Launch-and-attach orchestration
//!
//! One run walks through the stages in order:
//! `Idle → EnvironmentPrepared → TargetLaunched → ProcessResolved →
//! DebuggerAttached → Terminated`. Stages cannot be skipped or repeated, so
//! the debugger can only ever be attached to a pid that was resolved from the
//! process table. Every stage checks the [`CancelFlag`] before it starts and
//! the waiting parts race against it.

use crate::cancel::CancelFlag;
use crate::companion::{self, CompanionOptions, CompanionState};
use crate::compat::{CompatLayer, CompatRuntime};
use crate::config::{ATTACH_TIMEOUT_DEFAULT, POLL_INTERVAL_DEFAULT};
use crate::debugger::{self, Debugger, DebuggerBackend};
use crate::environment::{self, EnvDefinition, EnvInjector, EnvMap};
use crate::error::{LaunchError, LaunchResult};
use crate::process_table::{self, ProcessTable};
use crate::runner::{LaunchSpec, ProcessRunner};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    EnvironmentPrepared,
    TargetLaunched,
    ProcessResolved,
    DebuggerAttached,
    Terminated,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Idle => Some(Stage::EnvironmentPrepared),
            Stage::EnvironmentPrepared => Some(Stage::TargetLaunched),
            Stage::TargetLaunched => Some(Stage::ProcessResolved),
            Stage::ProcessResolved => Some(Stage::DebuggerAttached),
            Stage::DebuggerAttached => Some(Stage::Terminated),
            Stage::Terminated => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::EnvironmentPrepared => "environment-prepared",
            Stage::TargetLaunched => "target-launched",
            Stage::ProcessResolved => "process-resolved",
            Stage::DebuggerAttached => "debugger-attached",
            Stage::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Everything the command line decides about a run
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub compat: CompatLayer,
    pub debugger: DebuggerBackend,
    pub env_file: Option<PathBuf>,
    /// Executable to launch, relative paths resolve against the game directory
    pub target: Option<PathBuf>,
    pub process_name: Option<String>,
    pub debugger_config: Option<PathBuf>,
    pub poll_interval: Duration,
    pub attach_timeout: Duration,
    /// `None` leaves the EA app alone
    pub companion: Option<CompanionOptions>,
}

impl LaunchOptions {
    pub fn new(compat: CompatLayer, debugger: DebuggerBackend) -> Self {
        Self {
            compat,
            debugger,
            env_file: None,
            target: None,
            process_name: None,
            debugger_config: None,
            poll_interval: POLL_INTERVAL_DEFAULT,
            attach_timeout: ATTACH_TIMEOUT_DEFAULT,
            companion: None,
        }
    }
}

/// Result of environment preparation
#[derive(Debug, Clone)]
pub struct PreparedEnvironment {
    pub definition: EnvDefinition,
    pub runtime: CompatRuntime,
    pub debugger: Debugger,
}

impl PreparedEnvironment {
    pub fn env(&self) -> &EnvMap {
        self.runtime.env()
    }
}

/// Summary of a finished debugging session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub launcher_pid: u32,
    /// Host pid found in the process table
    pub target_pid: u32,
    /// Pid handed to the debugger
    pub debuggee_pid: u32,
    pub debugger_status: ExitStatus,
}

pub struct Orchestrator<R, T> {
    options: LaunchOptions,
    runner: R,
    table: T,
    base_env: EnvMap,
    cancel: CancelFlag,
    stage: Stage,
    prepared: Option<PreparedEnvironment>,
    launcher_pid: Option<u32>,
    target_pid: Option<u32>,
    companion: Option<CompanionState>,
}

impl<R, T> Orchestrator<R, T>
where
    R: ProcessRunner,
    T: ProcessTable,
{
    pub fn new(options: LaunchOptions, runner: R, table: T) -> Self {
        Self {
            options,
            runner,
            table,
            base_env: environment::ambient_env(),
            cancel: CancelFlag::new(),
            stage: Stage::Idle,
            prepared: None,
            launcher_pid: None,
            target_pid: None,
            companion: None,
        }
    }

    /// Replace the ambient environment snapshot children start from
    pub fn with_base_env(mut self, base_env: EnvMap) -> Self {
        self.base_env = base_env;
        self
    }

    /// Cancelling this handle stops the run at the next stage or wait
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn check_transition(&self, to: Stage) -> LaunchResult<()> {
        if self.stage.next() == Some(to) {
            Ok(())
        } else {
            Err(LaunchError::InvalidTransition {
                from: self.stage,
                to,
            })
        }
    }

    fn enter(&mut self, to: Stage) {
        debug!("stage {} -> {}", self.stage, to);
        self.stage = to;
    }

    fn prepared_or_err(&self, to: Stage) -> LaunchResult<&PreparedEnvironment> {
        self.prepared.as_ref().ok_or(LaunchError::InvalidTransition {
            from: self.stage,
            to,
        })
    }

    /// Load the environment definition and build the child environment.
    pub fn prepare_environment(&mut self) -> LaunchResult<&PreparedEnvironment> {
        self.check_transition(Stage::EnvironmentPrepared)?;
        self.cancel.check()?;

        let source = environment::locate(self.options.env_file.as_deref())?;
        info!("Loading environment from {}", source.display());
        let definition = EnvDefinition::load(&source)?;

        let env = environment::build_environment(
            &self.base_env,
            &definition,
            self.options.compat,
            &source,
        )?;
        debug!(
            "{}",
            EnvInjector::describe(&env, &["WINEPREFIX", "WINEESYNC", "WINEFSYNC", "WINEDEBUG"])
        );
        let runtime = CompatRuntime::new(self.options.compat, &definition, &source, env)?;
        let debugger = Debugger::resolve(
            self.options.debugger,
            &definition,
            self.options.debugger_config.as_deref(),
        )?;

        self.enter(Stage::EnvironmentPrepared);
        Ok(self.prepared.insert(PreparedEnvironment {
            definition,
            runtime,
            debugger,
        }))
    }

    fn require_prepared_stage(&self) -> LaunchResult<()> {
        if self.stage == Stage::EnvironmentPrepared {
            Ok(())
        } else {
            Err(LaunchError::InvalidTransition {
                from: self.stage,
                to: Stage::TargetLaunched,
            })
        }
    }

    /// Fetch the debugger if it is not installed yet
    pub async fn install_debugger(&self) -> LaunchResult<()> {
        self.require_prepared_stage()?;
        let prepared = self.prepared_or_err(Stage::TargetLaunched)?;
        self.cancel.guard(prepared.debugger.install()).await
    }

    /// Start the EA app if requested and not already running
    pub async fn start_companion(&mut self) -> LaunchResult<Option<CompanionState>> {
        self.require_prepared_stage()?;
        let Some(options) = self.options.companion.clone() else {
            return Ok(None);
        };
        let prepared = self.prepared_or_err(Stage::TargetLaunched)?;
        let layer = prepared.runtime.layer();

        let state = self
            .cancel
            .guard(companion::ensure_running(
                &prepared.runtime,
                &self.runner,
                &self.table,
                &options,
            ))
            .await?;
        self.companion = Some(state);

        if let Some(delay) = companion::settle_delay(state, layer, &options) {
            debug!("Giving EA App {}s to start", delay.as_secs());
            self.cancel
                .guard(async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
        }
        Ok(Some(state))
    }

    /// Spawn `executable_path` under the compatibility layer without waiting.
    ///
    /// Returns the pid of the launcher process, which is not necessarily the
    /// pid of the game itself.
    pub async fn launch_target(&mut self, executable_path: &Path) -> LaunchResult<u32> {
        self.check_transition(Stage::TargetLaunched)?;
        self.cancel.check()?;
        let prepared = self.prepared_or_err(Stage::TargetLaunched)?;

        let spec = prepared.runtime.spec(
            executable_path.as_os_str().to_os_string(),
            prepared.definition.game.args.iter().cloned(),
        );
        info!(
            "Launching {} under {}",
            executable_path.display(),
            prepared.runtime.layer()
        );
        let pid = self.runner.spawn(&spec).await?;

        self.launcher_pid = Some(pid);
        self.enter(Stage::TargetLaunched);
        Ok(pid)
    }

    /// Poll the process table for `executable_name`.
    ///
    /// Bounded by the attach timeout and aborted through
    /// [`Orchestrator::cancel_handle`]. On failure the launched process
    /// group is terminated.
    pub async fn resolve_process_id(
        &mut self,
        executable_name: &str,
        poll_interval: Duration,
    ) -> LaunchResult<u32> {
        self.check_transition(Stage::ProcessResolved)?;
        info!("Waiting for {}", executable_name);

        let lookup = process_table::resolve_process_id(
            &self.table,
            executable_name,
            poll_interval,
            self.options.attach_timeout,
        );
        let result = self.cancel.guard(lookup).await;

        match result {
            Ok(pid) => {
                info!("{} is running (pid={})", executable_name, pid);
                self.target_pid = Some(pid);
                self.enter(Stage::ProcessResolved);
                Ok(pid)
            }
            Err(err) => {
                if let Some(launcher) = self.launcher_pid {
                    warn!("Stopping launched process group {}", launcher);
                    self.runner.terminate(launcher).await;
                }
                Err(err)
            }
        }
    }

    /// Run the debugger against host process `pid` in the foreground until
    /// it exits.
    ///
    /// The pid is translated to its Wine pid first. If Wine does not list
    /// the process the host pid is passed unchanged.
    pub async fn attach_debugger(&mut self, pid: u32) -> LaunchResult<ExitStatus> {
        self.attach(pid).await.map(|(status, _)| status)
    }

    async fn attach(&mut self, pid: u32) -> LaunchResult<(ExitStatus, u32)> {
        let (spec, debuggee) = self.attach_spec(pid).await?;
        self.enter(Stage::DebuggerAttached);

        let status = self.runner.run(&spec).await?;
        if !status.success() {
            return Err(LaunchError::DebuggerFailed { status });
        }
        Ok((status, debuggee))
    }

    async fn attach_spec(&self, pid: u32) -> LaunchResult<(LaunchSpec, u32)> {
        self.check_transition(Stage::DebuggerAttached)?;
        self.cancel.check()?;
        let prepared = self.prepared_or_err(Stage::DebuggerAttached)?;

        if let Some(resolved) = self.target_pid.filter(|resolved| *resolved != pid) {
            warn!("attaching to pid {} but resolved pid {}", pid, resolved);
        }

        let name = self.process_name().unwrap_or_default();
        let lookup = debugger::query_wine_pid(&self.runner, &prepared.runtime, &name);
        let debuggee = match self.cancel.guard(lookup).await {
            Ok(Some(wine_pid)) => {
                info!("{} is Wine pid {} (host pid {})", name, wine_pid, pid);
                wine_pid
            }
            Ok(None) => {
                warn!("{} not listed by winedbg, using host pid {}", name, pid);
                pid
            }
            Err(LaunchError::Cancelled) => return Err(LaunchError::Cancelled),
            Err(err) => {
                warn!("Wine process listing failed: {}", err);
                pid
            }
        };

        let spec = prepared.debugger.attach_spec(&prepared.runtime, debuggee);
        info!("Attaching {} to pid {}", prepared.debugger.backend(), debuggee);
        Ok((spec, debuggee))
    }

    /// Executable to launch for this run
    pub fn target_path(&self) -> Option<PathBuf> {
        let prepared = self.prepared.as_ref()?;
        Some(match &self.options.target {
            Some(target) if target.is_absolute() => target.clone(),
            Some(target) => prepared.definition.game.dir.join(target),
            None => prepared.definition.target_path(),
        })
    }

    /// Name the target is polled under
    pub fn process_name(&self) -> Option<String> {
        if let Some(name) = &self.options.process_name {
            return Some(name.clone());
        }
        let prepared = self.prepared.as_ref()?;
        match &self.options.target {
            Some(target) => target
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            None => Some(prepared.definition.process_name()),
        }
    }

    /// Drive one full session.
    ///
    /// The EA app, when started here, is stopped afterwards unless
    /// `keep_alive` is set, whether or not the session succeeded.
    pub async fn run(&mut self) -> LaunchResult<SessionReport> {
        self.prepare_environment()?;
        let result = self.run_prepared().await;

        if let (Some(state), Some(options)) = (self.companion, self.options.companion.as_ref()) {
            companion::finish(state, &self.runner, options).await;
        }
        result
    }

    async fn run_prepared(&mut self) -> LaunchResult<SessionReport> {
        self.install_debugger().await?;
        self.start_companion().await?;

        let target = self
            .target_path()
            .ok_or(LaunchError::InvalidTransition {
                from: self.stage,
                to: Stage::TargetLaunched,
            })?;
        let process_name = self
            .process_name()
            .ok_or(LaunchError::InvalidTransition {
                from: self.stage,
                to: Stage::ProcessResolved,
            })?;

        let launcher_pid = self.launch_target(&target).await?;
        let target_pid = self
            .resolve_process_id(&process_name, self.options.poll_interval)
            .await?;
        let (debugger_status, debuggee_pid) = self.attach(target_pid).await?;

        self.check_transition(Stage::Terminated)?;
        self.enter(Stage::Terminated);
        info!("Debugger session finished");

        Ok(SessionReport {
            launcher_pid,
            target_pid,
            debuggee_pid,
            debugger_status,
        })
    }
}
