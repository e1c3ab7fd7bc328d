//! Environment variable injection for spawned processes

use super::builder::EnvMap;
use tokio::process::Command;

/// Applies a prepared environment map to a command
pub struct EnvInjector;

impl EnvInjector {
    /// Replace the command's environment with `env_vars`.
    ///
    /// The ambient environment is cleared first so children see exactly the
    /// prepared map.
    pub fn inject(cmd: &mut Command, env_vars: &EnvMap) {
        cmd.env_clear();
        cmd.envs(env_vars);
    }

    /// Values that are safe to print in debug output
    pub fn describe(env_vars: &EnvMap, keys: &[&str]) -> String {
        keys.iter()
            .filter_map(|key| env_vars.get(*key).map(|value| format!("{key}={value}")))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
