//! Compatibility layer selection
//!
//! Both layers are driven the same way: `<wine binary> <program> [args]` with
//! the prepared environment. They differ in where the wine binary lives and
//! which environment rules apply.

use crate::config::DEFAULT_WINE_BIN;
use crate::environment::{EnvDefinition, EnvMap};
use crate::error::{LaunchError, LaunchResult};
use crate::runner::LaunchSpec;
use clap::ValueEnum;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompatLayer {
    Proton,
    Wine,
}

impl fmt::Display for CompatLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompatLayer::Proton => write!(f, "proton"),
            CompatLayer::Wine => write!(f, "wine"),
        }
    }
}

/// A resolved compatibility layer ready to run Windows programs
#[derive(Debug, Clone)]
pub struct CompatRuntime {
    layer: CompatLayer,
    wine: PathBuf,
    env: EnvMap,
    game_dir: PathBuf,
}

impl CompatRuntime {
    pub fn new(
        layer: CompatLayer,
        definition: &EnvDefinition,
        source: &Path,
        env: EnvMap,
    ) -> LaunchResult<Self> {
        let wine = match layer {
            CompatLayer::Proton => {
                let proton = definition.require_proton(source)?;
                let wine = proton.tool.join("files").join("bin").join("wine");
                if !wine.is_file() {
                    return Err(LaunchError::CompatLayerNotFound(format!(
                        "Proton wine binary missing at {}",
                        wine.display()
                    )));
                }
                wine
            }
            CompatLayer::Wine => {
                warn!("Stock wine is known to have problems with the EA App");
                let binary = definition
                    .wine
                    .binary
                    .as_deref()
                    .unwrap_or(DEFAULT_WINE_BIN);
                resolve_binary(binary, &env, &definition.game.dir)?
            }
        };

        debug!("Using {} at {}", layer, wine.display());

        Ok(Self {
            layer,
            wine,
            env,
            game_dir: definition.game.dir.clone(),
        })
    }

    pub fn layer(&self) -> CompatLayer {
        self.layer
    }

    pub fn wine(&self) -> &Path {
        &self.wine
    }

    pub fn env(&self) -> &EnvMap {
        &self.env
    }

    pub fn game_dir(&self) -> &Path {
        &self.game_dir
    }

    /// Prefix directory the layer runs in, if known
    pub fn prefix(&self) -> Option<PathBuf> {
        self.env
            .get("WINEPREFIX")
            .map(PathBuf::from)
            .or_else(|| self.env.get("HOME").map(|home| Path::new(home).join(".wine")))
    }

    /// Build a spec running `program` under this layer from the game directory
    pub fn spec<I, S>(&self, program: impl Into<OsString>, args: I) -> LaunchSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut full_args = vec![program.into()];
        full_args.extend(args.into_iter().map(Into::into));

        LaunchSpec {
            program: self.wine.clone(),
            args: full_args,
            cwd: Some(self.game_dir.clone()),
            env: self.env.clone(),
            interactive: false,
        }
    }
}

fn resolve_binary(binary: &str, env: &EnvMap, cwd: &Path) -> LaunchResult<PathBuf> {
    which::which_in(binary, env.get("PATH"), cwd)
        .map_err(|e| LaunchError::CompatLayerNotFound(format!("'{}': {}", binary, e)))
}
