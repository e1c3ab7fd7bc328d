#![cfg(unix)]

use async_trait::async_trait;
use nsdbg::companion::CompanionOptions;
use nsdbg::environment::EnvMap;
use nsdbg::process_table::ProcessEntry;
use nsdbg::{
    CompatLayer, DebuggerBackend, LaunchError, LaunchOptions, LaunchResult, LaunchSpec,
    Orchestrator, ProcessRunner, ProcessTable, Stage,
};
use pretty_assertions::assert_eq;
use std::ffi::OsString;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Spawn(LaunchSpec),
    Run(LaunchSpec),
    Output(LaunchSpec),
    Terminate(u32),
    Snapshot,
}

#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    fn spawned(&self) -> Vec<LaunchSpec> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Spawn(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    fn ran(&self) -> Vec<LaunchSpec> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Run(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    fn terminated(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Terminate(pid) => Some(pid),
                _ => None,
            })
            .collect()
    }
}

type RunHook = Box<dyn Fn(&LaunchSpec) + Send + Sync>;

struct FakeRunner {
    log: EventLog,
    next_pid: AtomicU32,
    exit_code: i32,
    /// stdout of captured runs (the winedbg process listing)
    listing: String,
    on_run: Option<RunHook>,
}

impl FakeRunner {
    fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            next_pid: AtomicU32::new(1000),
            exit_code: 0,
            listing: String::new(),
            on_run: None,
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn spawn(&self, spec: &LaunchSpec) -> LaunchResult<u32> {
        self.log.push(Event::Spawn(spec.clone()));
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    async fn run(&self, spec: &LaunchSpec) -> LaunchResult<ExitStatus> {
        self.log.push(Event::Run(spec.clone()));
        if let Some(hook) = &self.on_run {
            hook(spec);
        }
        Ok(ExitStatus::from_raw(self.exit_code << 8))
    }

    async fn output(&self, spec: &LaunchSpec) -> LaunchResult<Output> {
        self.log.push(Event::Output(spec.clone()));
        Ok(Output {
            status: ExitStatus::from_raw(0),
            stdout: self.listing.clone().into_bytes(),
            stderr: Vec::new(),
        })
    }

    async fn terminate(&self, pid: u32) {
        self.log.push(Event::Terminate(pid));
    }
}

/// Process table where `entries` show up after `appear_after` snapshots
struct FakeTable {
    log: EventLog,
    always: Vec<ProcessEntry>,
    entries: Vec<ProcessEntry>,
    appear_after: usize,
    calls: AtomicUsize,
}

impl FakeTable {
    fn new(log: &EventLog, entries: Vec<ProcessEntry>, appear_after: usize) -> Self {
        Self {
            log: log.clone(),
            always: Vec::new(),
            entries,
            appear_after,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_running(mut self, name: &str, pid: u32) -> Self {
        self.always.push(entry(pid, name));
        self
    }
}

impl ProcessTable for FakeTable {
    fn snapshot(&self) -> LaunchResult<Vec<ProcessEntry>> {
        self.log.push(Event::Snapshot);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.always.clone();
        if call >= self.appear_after {
            entries.extend(self.entries.iter().cloned());
        }
        Ok(entries)
    }
}

fn entry(pid: u32, name: &str) -> ProcessEntry {
    ProcessEntry {
        pid,
        name: name.to_string(),
    }
}

struct Fixture {
    dir: TempDir,
    env_file: PathBuf,
    layer: CompatLayer,
}

impl Fixture {
    fn new(extra: &str) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let bin = dir.path().join("proton/files/bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("wine"), "").unwrap();
        fs::create_dir_all(dir.path().join("game")).unwrap();

        let env_file = dir.path().join("env.toml");
        fs::write(
            &env_file,
            format!(
                r#"
[game]
dir = "{root}/game"
args = ["-northstar"]

[proton]
tool = "{root}/proton"
compat_data = "{root}/compat/pfx"
steam_client = "{root}/steam"
{extra}"#,
                root = dir.path().display(),
            ),
        )
        .unwrap();

        Self {
            dir,
            env_file,
            layer: CompatLayer::Proton,
        }
    }

    /// Plain Wine with a prefix under the temp dir
    fn wine_layer() -> Self {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("temp dir");
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let wine = bin.join("wine");
        fs::write(&wine, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&wine, fs::Permissions::from_mode(0o755)).unwrap();
        fs::create_dir_all(dir.path().join("game")).unwrap();
        fs::create_dir_all(dir.path().join("prefix/drive_c")).unwrap();

        let env_file = dir.path().join("env.toml");
        fs::write(
            &env_file,
            format!(
                r#"
[game]
dir = "{root}/game"

[wine]
binary = "{root}/bin/wine"
prefix = "{root}/prefix"
"#,
                root = dir.path().display(),
            ),
        )
        .unwrap();

        Self {
            dir,
            env_file,
            layer: CompatLayer::Wine,
        }
    }

    fn wine(&self) -> PathBuf {
        match self.layer {
            CompatLayer::Proton => self.dir.path().join("proton/files/bin/wine"),
            CompatLayer::Wine => self.dir.path().join("bin/wine"),
        }
    }

    fn ea_desktop_exe(&self) -> PathBuf {
        self.dir.path().join(
            "prefix/drive_c/Program Files/Electronic Arts/EA Desktop/EA Desktop/EADesktop.exe",
        )
    }

    fn game_dir(&self) -> PathBuf {
        self.dir.path().join("game")
    }

    fn options(&self) -> LaunchOptions {
        let mut options = LaunchOptions::new(self.layer, DebuggerBackend::Winedbg);
        options.env_file = Some(self.env_file.clone());
        options.poll_interval = Duration::from_millis(5);
        options.attach_timeout = Duration::from_secs(2);
        options
    }
}

fn orchestrator(
    options: LaunchOptions,
    log: &EventLog,
    table: FakeTable,
) -> Orchestrator<FakeRunner, FakeTable> {
    Orchestrator::new(options, FakeRunner::new(log), table).with_base_env(EnvMap::new())
}

fn args(values: &[&str]) -> Vec<OsString> {
    values.iter().map(OsString::from).collect()
}

#[tokio::test]
async fn missing_definition_fails_before_any_spawn() {
    let fixture = Fixture::new("");
    let mut options = fixture.options();
    options.env_file = Some(fixture.dir.path().join("missing.toml"));

    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(4242, "NorthstarLauncher.exe")], 0);
    let mut orch = orchestrator(options, &log, table);

    let err = orch.run().await.unwrap_err();
    assert!(matches!(err, LaunchError::ConfigurationMissing { .. }));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(orch.stage(), Stage::Idle);
    assert!(log.events().is_empty(), "no process may be touched");
}

#[tokio::test]
async fn debugger_attaches_once_to_pid_found_on_first_poll() {
    let fixture = Fixture::new("");
    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(4242, "NorthstarLaunch")], 0);
    let mut orch = orchestrator(fixture.options(), &log, table);

    let report = orch.run().await.expect("session succeeds");
    assert_eq!(report.target_pid, 4242);
    assert_eq!(report.debuggee_pid, 4242, "unlisted by winedbg, host pid is kept");
    assert_eq!(report.launcher_pid, 1000);
    assert!(report.debugger_status.success());
    assert_eq!(orch.stage(), Stage::Terminated);

    let events = log.events();
    assert_eq!(
        events.len(),
        4,
        "spawn, one poll, process listing, one debugger run: {events:?}"
    );
    assert!(matches!(events[0], Event::Spawn(_)));
    assert_eq!(events[1], Event::Snapshot);
    assert!(matches!(events[2], Event::Output(_)));

    let debugger_runs = log.ran();
    assert_eq!(debugger_runs.len(), 1);
    let debugger = &debugger_runs[0];
    assert_eq!(debugger.program, fixture.wine());
    assert_eq!(debugger.args, args(&["winedbg", "4242"]));
    assert!(debugger.interactive);
}

#[tokio::test]
async fn target_is_launched_through_proton_wine_with_game_args() {
    let fixture = Fixture::new("");
    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(7, "NorthstarLauncher.exe")], 0);
    let mut orch = orchestrator(fixture.options(), &log, table);
    orch.run().await.unwrap();

    let spawned = log.spawned();
    assert_eq!(spawned.len(), 1);
    let target = &spawned[0];
    assert_eq!(target.program, fixture.wine());
    assert_eq!(
        target.args,
        vec![
            fixture
                .game_dir()
                .join("NorthstarLauncher.exe")
                .into_os_string(),
            OsString::from("-northstar"),
        ]
    );
    assert_eq!(target.cwd.as_deref(), Some(fixture.game_dir().as_path()));
    assert!(!target.interactive);

    let compat = fixture.dir.path().join("compat");
    assert_eq!(
        target.env["WINEPREFIX"],
        format!("{}/pfx", compat.display())
    );
    assert_eq!(target.env["DXVK_LOG_LEVEL"], "none");
    assert_eq!(target.env["WINEDEBUG"], "-all");
}

#[tokio::test]
async fn debugger_is_never_attached_before_resolution() {
    let fixture = Fixture::new("");
    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![], 0);
    let mut orch = orchestrator(fixture.options(), &log, table);

    let err = orch.attach_debugger(4242).await.unwrap_err();
    assert!(matches!(
        err,
        LaunchError::InvalidTransition {
            from: Stage::Idle,
            to: Stage::DebuggerAttached
        }
    ));

    orch.prepare_environment().unwrap();
    orch.launch_target(Path::new("NorthstarLauncher.exe"))
        .await
        .unwrap();
    let err = orch.attach_debugger(4242).await.unwrap_err();
    assert!(matches!(
        err,
        LaunchError::InvalidTransition {
            from: Stage::TargetLaunched,
            ..
        }
    ));
    assert!(log.ran().is_empty());
}

#[tokio::test]
async fn debugger_runs_only_after_the_successful_poll() {
    let fixture = Fixture::new("");
    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(31337, "NorthstarLauncher.exe")], 3);
    let mut orch = orchestrator(fixture.options(), &log, table);
    orch.run().await.unwrap();

    let events = log.events();
    let run_index = events
        .iter()
        .position(|e| matches!(e, Event::Run(_)))
        .expect("debugger ran");
    let snapshots_before = events[..run_index]
        .iter()
        .filter(|e| **e == Event::Snapshot)
        .count();
    assert_eq!(snapshots_before, 4);
    assert!(events[run_index + 1..].is_empty());
    assert_eq!(log.ran()[0].args, args(&["winedbg", "31337"]));
}

#[tokio::test]
async fn timeout_reports_process_not_found_and_stops_launcher() {
    let fixture = Fixture::new("");
    let mut options = fixture.options();
    options.attach_timeout = Duration::from_millis(40);

    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![], usize::MAX);
    let mut orch = orchestrator(options, &log, table);

    let err = orch.run().await.unwrap_err();
    match err {
        LaunchError::ProcessNotFound { name, .. } => assert_eq!(name, "NorthstarLauncher.exe"),
        other => panic!("expected ProcessNotFound, got {other:?}"),
    }
    assert_eq!(orch.stage(), Stage::TargetLaunched);
    assert_eq!(log.terminated(), vec![1000]);
    assert!(log.ran().is_empty());
}

#[tokio::test]
async fn debugger_gets_wine_pid_from_process_listing() {
    let fixture = Fixture::new("");
    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(4242, "NorthstarLauncher.exe")], 0);
    let mut runner = FakeRunner::new(&log);
    runner.listing = concat!(
        " pid      threads  executable (all id:s are in hex)\n",
        ">00000110 1        'winedbg.exe'\n",
        " 00000020 3        'start.exe'\n",
        " 0000002c 12       \\_ 'NorthstarLauncher.exe'\n",
    )
    .to_string();
    let mut orch =
        Orchestrator::new(fixture.options(), runner, table).with_base_env(EnvMap::new());

    let report = orch.run().await.unwrap();
    assert_eq!(report.target_pid, 4242);
    assert_eq!(report.debuggee_pid, 0x2c);

    let listing = log
        .events()
        .into_iter()
        .find_map(|e| match e {
            Event::Output(spec) => Some(spec),
            _ => None,
        })
        .expect("process listing requested");
    assert_eq!(listing.args, args(&["winedbg", "--command", "info proc"]));
    assert_eq!(log.ran()[0].args, args(&["winedbg", "44"]));
}

#[tokio::test]
async fn cancellation_before_start_touches_nothing() {
    let fixture = Fixture::new("");
    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(4242, "NorthstarLauncher.exe")], 0);
    let mut orch = orchestrator(fixture.options(), &log, table);
    orch.cancel_handle().cancel();

    let err = orch.run().await.unwrap_err();
    assert!(matches!(err, LaunchError::Cancelled));
    assert_eq!(err.exit_code(), 130);
    assert_eq!(orch.stage(), Stage::Idle);
    assert!(log.events().is_empty());
}

#[tokio::test]
async fn cancellation_during_wait_stops_launcher() {
    let fixture = Fixture::new("");
    let mut options = fixture.options();
    options.attach_timeout = Duration::from_secs(30);

    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![], usize::MAX);
    let mut orch = orchestrator(options, &log, table);
    let cancel = orch.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = orch.run().await.unwrap_err();
    assert!(matches!(err, LaunchError::Cancelled));
    assert_eq!(orch.stage(), Stage::TargetLaunched);
    assert_eq!(log.spawned().len(), 1);
    assert_eq!(log.terminated(), vec![1000]);
    assert!(log.ran().is_empty());
}

#[tokio::test]
async fn cancellation_during_companion_settle_never_launches_target() {
    let fixture = Fixture::new("");
    let mut options = fixture.options();
    options.companion = Some(CompanionOptions {
        install: false,
        keep_alive: false,
        settle: Duration::from_secs(30),
    });

    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(4242, "NorthstarLauncher.exe")], 0);
    let mut orch = orchestrator(options, &log, table);
    let cancel = orch.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = orch.run().await.unwrap_err();
    assert!(matches!(err, LaunchError::Cancelled));
    assert_eq!(orch.stage(), Stage::EnvironmentPrepared);

    let spawned = log.spawned();
    assert_eq!(spawned.len(), 1, "only the EA app: {spawned:?}");
    assert_eq!(spawned[0].args[0], OsString::from("steam.exe"));
    // the companion we started is still cleaned up
    assert_eq!(log.terminated(), vec![1000]);
    assert!(log.ran().is_empty());
}

#[tokio::test]
async fn failing_debugger_is_reported() {
    let fixture = Fixture::new("");
    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(5, "NorthstarLauncher.exe")], 0);
    let mut runner = FakeRunner::new(&log);
    runner.exit_code = 2;
    let mut orch =
        Orchestrator::new(fixture.options(), runner, table).with_base_env(EnvMap::new());

    let err = orch.run().await.unwrap_err();
    match err {
        LaunchError::DebuggerFailed { status } => assert_eq!(status.code(), Some(2)),
        other => panic!("expected DebuggerFailed, got {other:?}"),
    }
    assert_eq!(orch.stage(), Stage::DebuggerAttached);
}

#[tokio::test]
async fn preparing_twice_from_same_input_yields_same_environment() {
    let fixture = Fixture::new("[env]\nDXVK_HUD = \"fps\"\n");
    let log = EventLog::default();

    let mut first = orchestrator(fixture.options(), &log, FakeTable::new(&log, vec![], 0));
    let mut second = orchestrator(fixture.options(), &log, FakeTable::new(&log, vec![], 0));
    let env_a = first.prepare_environment().unwrap().env().clone();
    let env_b = second.prepare_environment().unwrap().env().clone();

    assert_eq!(env_a, env_b);
    assert_eq!(env_a["DXVK_HUD"], "fps");

    let again = first.prepare_environment().unwrap_err();
    assert!(matches!(again, LaunchError::InvalidTransition { .. }));
}

#[tokio::test]
async fn target_override_changes_polled_name() {
    let fixture = Fixture::new("");
    let mut options = fixture.options();
    options.target = Some(PathBuf::from("Titanfall2.exe"));

    let log = EventLog::default();
    let table = FakeTable::new(
        &log,
        vec![entry(1, "NorthstarLaunch"), entry(88, "Titanfall2.exe")],
        0,
    );
    let mut orch = orchestrator(options, &log, table);
    let report = orch.run().await.unwrap();

    assert_eq!(report.target_pid, 88);
    assert_eq!(
        log.spawned()[0].args[0],
        fixture.game_dir().join("Titanfall2.exe").into_os_string()
    );
}

#[tokio::test]
async fn companion_started_through_steam_is_stopped_afterwards() {
    let fixture = Fixture::new("");
    let mut options = fixture.options();
    options.companion = Some(CompanionOptions {
        install: false,
        keep_alive: false,
        settle: Duration::ZERO,
    });

    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(4242, "NorthstarLauncher.exe")], 0);
    let mut orch = orchestrator(options, &log, table);
    orch.run().await.unwrap();

    let spawned = log.spawned();
    assert_eq!(spawned.len(), 2);
    assert_eq!(
        spawned[0].args,
        args(&["steam.exe", "link2ea://launchgame/0?platform=steam&theme=tf2"])
    );
    // companion pid 1000, game launcher 1001
    assert_eq!(log.terminated(), vec![1000]);
    assert!(matches!(log.events().last(), Some(Event::Terminate(1000))));
}

#[tokio::test]
async fn companion_is_kept_when_requested() {
    let fixture = Fixture::new("");
    let mut options = fixture.options();
    options.companion = Some(CompanionOptions {
        install: false,
        keep_alive: true,
        settle: Duration::ZERO,
    });

    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(4242, "NorthstarLauncher.exe")], 0);
    let mut orch = orchestrator(options, &log, table);
    orch.run().await.unwrap();

    assert_eq!(log.spawned().len(), 2);
    assert!(log.terminated().is_empty());
}

#[tokio::test]
async fn running_companion_is_not_started_again() {
    let fixture = Fixture::new("");
    let mut options = fixture.options();
    options.companion = Some(CompanionOptions::default());

    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(4242, "NorthstarLauncher.exe")], 0)
        .with_running("EADesktop.exe", 600);
    let mut orch = orchestrator(options, &log, table);
    orch.run().await.unwrap();

    let spawned = log.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].args[1], OsString::from("-northstar"));
    assert!(log.terminated().is_empty());
}

fn companion_options(install: bool) -> CompanionOptions {
    CompanionOptions {
        install,
        keep_alive: false,
        settle: Duration::ZERO,
    }
}

#[tokio::test]
async fn wine_companion_missing_without_install_is_unavailable() {
    let fixture = Fixture::wine_layer();
    let mut options = fixture.options();
    options.companion = Some(companion_options(false));

    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(4242, "NorthstarLauncher.exe")], 0);
    let mut orch = orchestrator(options, &log, table);

    let err = orch.run().await.unwrap_err();
    match err {
        LaunchError::CompanionUnavailable(message) => {
            assert!(message.contains("--install-ea"), "{message}")
        }
        other => panic!("expected CompanionUnavailable, got {other:?}"),
    }
    assert!(log.spawned().is_empty());
    assert!(log.ran().is_empty());
}

#[tokio::test]
async fn wine_companion_is_installed_then_started() {
    let fixture = Fixture::wine_layer();
    let mut options = fixture.options();
    options.companion = Some(companion_options(true));

    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(4242, "NorthstarLauncher.exe")], 0);
    let mut runner = FakeRunner::new(&log);
    let installed = fixture.ea_desktop_exe();
    runner.on_run = Some(Box::new(move |spec: &LaunchSpec| {
        let is_installer = spec
            .args
            .first()
            .is_some_and(|program| Path::new(program).ends_with("EAappInstaller.exe"));
        if is_installer {
            fs::create_dir_all(installed.parent().unwrap()).unwrap();
            fs::write(&installed, "").unwrap();
        }
    }));
    let mut orch = Orchestrator::new(options, runner, table).with_base_env(EnvMap::new());

    orch.run().await.expect("session succeeds");

    let ran = log.ran();
    assert_eq!(ran.len(), 2, "installer, then debugger");
    let installer = &ran[0];
    assert_eq!(installer.program, fixture.wine());
    assert_eq!(
        installer.args,
        vec![fixture
            .game_dir()
            .join("__Installer/Origin/redist/internal/EAappInstaller.exe")
            .into_os_string()]
    );
    assert!(installer.interactive);

    let spawned = log.spawned();
    assert_eq!(spawned.len(), 2, "EA app, then the game");
    assert_eq!(
        spawned[0].args,
        args(&["C:\\Program Files\\Electronic Arts\\EA Desktop\\EA Desktop\\EADesktop.exe"])
    );
    assert_eq!(
        spawned[1].env["WINEPREFIX"],
        fixture.dir.path().join("prefix").display().to_string()
    );
    assert_eq!(log.terminated(), vec![1000]);
}

#[tokio::test]
async fn wine_companion_failed_install_is_unavailable() {
    let fixture = Fixture::wine_layer();
    let mut options = fixture.options();
    options.companion = Some(companion_options(true));

    let log = EventLog::default();
    let table = FakeTable::new(&log, vec![entry(4242, "NorthstarLauncher.exe")], 0);
    let mut orch = orchestrator(options, &log, table);

    let err = orch.run().await.unwrap_err();
    match err {
        LaunchError::CompanionUnavailable(message) => {
            assert!(message.contains("failed to install"), "{message}")
        }
        other => panic!("expected CompanionUnavailable, got {other:?}"),
    }
    assert_eq!(log.ran().len(), 1, "only the installer ran");
    assert!(log.spawned().is_empty());
    assert!(!fixture.ea_desktop_exe().exists());
}
