//! Debugger backends
//!
//! Both debuggers are Windows programs run through the compatibility layer
//! and attached by pid. x64dbg is downloaded into the cache directory on
//! first use unless a path is configured.

use crate::compat::CompatRuntime;
use crate::config::{
    CONFIG_DIRECTORY, WINEDBG_BIN, X64DBG_CACHE_DIR, X64DBG_DOWNLOAD_URL, X64DBG_EXE_PATH,
};
use crate::environment::EnvDefinition;
use crate::error::{LaunchError, LaunchResult};
use crate::process_table::name_matches;
use crate::runner::{LaunchSpec, ProcessRunner};
use clap::ValueEnum;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DebuggerBackend {
    Winedbg,
    X64dbg,
}

impl fmt::Display for DebuggerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebuggerBackend::Winedbg => write!(f, "winedbg"),
            DebuggerBackend::X64dbg => write!(f, "x64dbg"),
        }
    }
}

/// A debugger whose script has been checked to exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debugger {
    backend: DebuggerBackend,
    executable: PathBuf,
    config: Option<PathBuf>,
    /// Cache directory x64dbg is unpacked into when `executable` is missing
    install_dir: Option<PathBuf>,
}

impl Debugger {
    /// Resolve the backend against the definition file.
    ///
    /// `config_override` (from the command line) wins over `[debugger].config`.
    /// A configured x64dbg path must exist; the cached copy may still have
    /// to be fetched with [`Debugger::install`].
    pub fn resolve(
        backend: DebuggerBackend,
        definition: &EnvDefinition,
        config_override: Option<&Path>,
    ) -> LaunchResult<Self> {
        let config = config_override
            .map(Path::to_path_buf)
            .or_else(|| definition.debugger.config.clone());

        if let Some(path) = config.as_ref() {
            if !path.is_file() {
                return Err(LaunchError::DebuggerConfigMissing(path.clone()));
            }
        }

        let (executable, config, install_dir) = match backend {
            DebuggerBackend::Winedbg => (PathBuf::from(WINEDBG_BIN), config, None),
            DebuggerBackend::X64dbg => {
                let (executable, install_dir) = match definition.debugger.x64dbg.clone() {
                    Some(path) if path.is_file() => (path, None),
                    Some(path) => return Err(LaunchError::DebuggerNotFound(path)),
                    None => {
                        let dir = default_x64dbg_dir().ok_or_else(|| {
                            LaunchError::DebuggerNotFound(PathBuf::from("x64dbg.exe"))
                        })?;
                        (x64dbg_exe(&dir), Some(dir))
                    }
                };
                if let Some(path) = config {
                    warn!("x64dbg does not take a script, ignoring {}", path.display());
                }
                (executable, None, install_dir)
            }
        };

        debug!("Using {} ({})", backend, executable.display());
        Ok(Self {
            backend,
            executable,
            config,
            install_dir,
        })
    }

    pub fn backend(&self) -> DebuggerBackend {
        self.backend
    }

    pub fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Download and unpack x64dbg into the cache if it is not there yet
    pub async fn install(&self) -> LaunchResult<()> {
        let Some(dir) = self.install_dir.as_ref() else {
            return Ok(());
        };
        if self.executable.is_file() {
            return Ok(());
        }

        info!("Downloading x64dbg");
        let archive = download(X64DBG_DOWNLOAD_URL).await?;

        info!("Extracting x64dbg into {}", dir.display());
        let target = dir.clone();
        tokio::task::spawn_blocking(move || extract_archive(&archive, &target))
            .await
            .map_err(|e| LaunchError::DebuggerDownload(e.to_string()))??;

        if !self.executable.is_file() {
            return Err(LaunchError::DebuggerNotFound(self.executable.clone()));
        }
        Ok(())
    }

    /// Command attaching this debugger to the Wine process `pid`, run in the
    /// foreground
    pub fn attach_spec(&self, runtime: &CompatRuntime, pid: u32) -> LaunchSpec {
        let mut args: Vec<OsString> = Vec::new();
        match self.backend {
            DebuggerBackend::Winedbg => {
                if let Some(config) = &self.config {
                    args.push("--file".into());
                    args.push(config.clone().into_os_string());
                }
                args.push(pid.to_string().into());
            }
            DebuggerBackend::X64dbg => {
                args.push("-p".into());
                args.push(pid.to_string().into());
            }
        }

        runtime
            .spec(self.executable.clone().into_os_string(), args)
            .interactive()
    }
}

/// Look up the Wine pid of `name` through `winedbg --command "info proc"`.
///
/// Both debuggers attach by Windows pid, which differs from the host pid
/// found in the process table. `Ok(None)` when the listing does not contain
/// `name`.
pub async fn query_wine_pid<R>(
    runner: &R,
    runtime: &CompatRuntime,
    name: &str,
) -> LaunchResult<Option<u32>>
where
    R: ProcessRunner + ?Sized,
{
    let spec = runtime.spec(WINEDBG_BIN, ["--command", "info proc"]);
    let output = runner.output(&spec).await?;
    if !output.status.success() {
        warn!("winedbg process listing exited with {}", output.status);
        return Ok(None);
    }
    Ok(parse_wine_pid(&String::from_utf8_lossy(&output.stdout), name))
}

/// Find `name` in an `info proc` listing. Ids are printed in hex:
///
/// ```text
///  pid      threads  executable (all id:s are in hex)
/// >00000110 1        'winedbg.exe'
///  00000020 3        \_ 'NorthstarLauncher.exe'
/// ```
pub fn parse_wine_pid(listing: &str, name: &str) -> Option<u32> {
    listing.lines().find_map(|line| {
        let (head, rest) = line.split_once('\'')?;
        let executable = rest.split('\'').next()?;
        if !name_matches(executable, name) {
            return None;
        }
        let id = head
            .split_whitespace()
            .next()?
            .trim_start_matches(|c: char| !c.is_ascii_hexdigit());
        u32::from_str_radix(id, 16).ok()
    })
}

fn default_x64dbg_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|cache| cache.join(CONFIG_DIRECTORY).join(X64DBG_CACHE_DIR))
}

fn x64dbg_exe(dir: &Path) -> PathBuf {
    X64DBG_EXE_PATH
        .iter()
        .fold(dir.to_path_buf(), |path, part| path.join(part))
}

async fn download(url: &str) -> LaunchResult<Vec<u8>> {
    let response = reqwest::get(url).await.map_err(download_error)?;
    if !response.status().is_success() {
        return Err(LaunchError::DebuggerDownload(format!(
            "{} returned {}",
            url,
            response.status()
        )));
    }
    let bytes = response.bytes().await.map_err(download_error)?;
    Ok(bytes.to_vec())
}

fn download_error(err: reqwest::Error) -> LaunchError {
    LaunchError::DebuggerDownload(err.to_string())
}

/// Unpack a zip archive into `dir`
pub fn extract_archive(archive: &[u8], dir: &Path) -> LaunchResult<()> {
    fs::create_dir_all(dir)?;
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| LaunchError::DebuggerDownload(format!("invalid archive: {}", e)))?;
    zip.extract(dir)
        .map_err(|e| LaunchError::DebuggerDownload(format!("failed to extract archive: {}", e)))
}
