//! Environment definition file
//!
//! The definition file carries every path and identifier the compatibility
//! layer needs: game directory, Proton tool and prefix, Steam client path,
//! sync flags, and extra variables re-exported to children.

use crate::config::{
    CONFIG_DIRECTORY, CONFIG_FILE_NAME, DEFAULT_TARGET_EXE, ENV_FILE_ENV, ENV_FILE_NAME,
    TITANFALL2_APPID,
};
use crate::error::{LaunchError, LaunchResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment definition file root structure
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvDefinition {
    pub game: GameSection,

    #[serde(default)]
    pub proton: Option<ProtonSection>,

    #[serde(default)]
    pub wine: WineSection,

    #[serde(default)]
    pub sync: SyncSection,

    #[serde(default)]
    pub debugger: DebuggerSection,

    /// Variables re-exported verbatim to every child
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GameSection {
    pub dir: PathBuf,

    #[serde(default = "default_executable")]
    pub executable: String,

    /// Name polled in the process table (defaults to the executable's file name)
    #[serde(default)]
    pub process_name: Option<String>,

    #[serde(default = "default_app_id")]
    pub app_id: u32,

    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtonSection {
    /// Proton install directory (contains `files/bin/wine`)
    pub tool: PathBuf,
    /// `compatdata/<appid>` directory; a trailing `pfx` is stripped on load
    pub compat_data: PathBuf,
    pub steam_client: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WineSection {
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default)]
    pub prefix: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSection {
    #[serde(default = "enabled")]
    pub esync: bool,
    #[serde(default = "enabled")]
    pub fsync: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            esync: true,
            fsync: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebuggerSection {
    #[serde(default)]
    pub config: Option<PathBuf>,
    #[serde(default)]
    pub x64dbg: Option<PathBuf>,
}

fn default_executable() -> String {
    DEFAULT_TARGET_EXE.to_string()
}

fn default_app_id() -> u32 {
    TITANFALL2_APPID
}

fn enabled() -> bool {
    true
}

impl EnvDefinition {
    /// Load and normalise a definition file.
    pub fn load(path: &Path) -> LaunchResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| invalid(path, e.to_string()))?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> LaunchResult<Self> {
        let mut definition: EnvDefinition =
            toml::from_str(content).map_err(|e| invalid(path, e.to_string()))?;
        definition.normalize(path)?;
        Ok(definition)
    }

    /// Expand `~`/`${VAR}` in every path and strip a trailing `pfx` from the
    /// Proton compat data directory.
    fn normalize(&mut self, path: &Path) -> LaunchResult<()> {
        self.game.dir = expand_path(&self.game.dir, path)?;

        if let Some(proton) = self.proton.as_mut() {
            proton.tool = expand_path(&proton.tool, path)?;
            proton.steam_client = expand_path(&proton.steam_client, path)?;

            let compat_data = expand_path(&proton.compat_data, path)?;
            proton.compat_data = if compat_data.file_name().is_some_and(|n| n == "pfx") {
                compat_data
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or(compat_data)
            } else {
                compat_data
            };
        }

        if let Some(prefix) = self.wine.prefix.as_ref() {
            self.wine.prefix = Some(expand_path(prefix, path)?);
        }
        if let Some(config) = self.debugger.config.as_ref() {
            self.debugger.config = Some(expand_path(config, path)?);
        }
        if let Some(x64dbg) = self.debugger.x64dbg.as_ref() {
            self.debugger.x64dbg = Some(expand_path(x64dbg, path)?);
        }

        if self.game.executable.trim().is_empty() {
            return Err(invalid(path, "game.executable cannot be empty"));
        }

        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(invalid(
                    path,
                    format!("invalid environment variable name '{}'", key),
                ));
            }
        }

        Ok(())
    }

    /// Name the target shows up as in the process table
    pub fn process_name(&self) -> String {
        self.game.process_name.clone().unwrap_or_else(|| {
            Path::new(&self.game.executable)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.game.executable.clone())
        })
    }

    /// Absolute path of the target executable
    pub fn target_path(&self) -> PathBuf {
        self.game.dir.join(&self.game.executable)
    }

    /// Proton section, required when running under Proton
    pub fn require_proton(&self, path: &Path) -> LaunchResult<&ProtonSection> {
        self.proton
            .as_ref()
            .ok_or_else(|| invalid(path, "[proton] section is required for --compat proton"))
    }
}

/// Locate the definition file.
///
/// Lookup order: explicit path, `$NSDBG_ENV_FILE`, `./nsdbg.toml`,
/// `$XDG_CONFIG_HOME/nsdbg/env.toml`. An explicit path that does not exist is
/// reported as missing rather than falling through.
pub fn locate(explicit: Option<&Path>) -> LaunchResult<PathBuf> {
    let candidates: Vec<PathBuf> = match explicit {
        Some(path) => vec![path.to_path_buf()],
        None => default_candidates(),
    };

    let found = candidates.iter().find(|candidate| candidate.is_file()).cloned();
    found.ok_or(LaunchError::ConfigurationMissing {
        searched: candidates,
    })
}

fn default_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(from_env) = std::env::var_os(ENV_FILE_ENV).filter(|v| !v.is_empty()) {
        candidates.push(PathBuf::from(from_env));
    }
    candidates.push(PathBuf::from(ENV_FILE_NAME));
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join(CONFIG_DIRECTORY).join(CONFIG_FILE_NAME));
    }
    candidates
}

fn expand_path(value: &Path, source: &Path) -> LaunchResult<PathBuf> {
    let raw = value.to_string_lossy();
    shellexpand::full(&raw)
        .map(|expanded| PathBuf::from(expanded.as_ref()))
        .map_err(|e| invalid(source, e.to_string()))
}

fn invalid(path: &Path, message: impl Into<String>) -> LaunchError {
    LaunchError::InvalidConfiguration {
        path: path.to_path_buf(),
        message: message.into(),
    }
}
