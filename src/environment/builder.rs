//! Child environment construction
//!
//! The map built here is the only channel through which configuration
//! reaches spawned processes. The orchestrator's own environment is only read.

use super::definition::EnvDefinition;
use crate::compat::CompatLayer;
use crate::config::{DEFAULT_ENV, FIXED_ENV_OVERRIDES, WINE_DLL_OVERRIDES};
use crate::error::LaunchResult;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub type EnvMap = BTreeMap<String, String>;

/// Snapshot of the current process environment (non UTF-8 entries skipped)
pub fn ambient_env() -> EnvMap {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

/// Build the environment for every child of this run.
///
/// Layering: `base`, then the definition's `[env]` table, then the
/// compatibility layer rules, then [`DEFAULT_ENV`] and [`FIXED_ENV_OVERRIDES`].
/// The result depends only on the inputs.
pub fn build_environment(
    base: &EnvMap,
    definition: &EnvDefinition,
    layer: CompatLayer,
    source: &Path,
) -> LaunchResult<EnvMap> {
    let mut env = base.clone();
    env.extend(definition.env.clone());

    match layer {
        CompatLayer::Proton => apply_proton(&mut env, definition, source)?,
        CompatLayer::Wine => apply_wine(&mut env, definition),
    }

    for (key, value) in DEFAULT_ENV {
        set_default(&mut env, key, value);
    }
    for (key, value) in FIXED_ENV_OVERRIDES {
        env.insert(key.to_string(), value.to_string());
    }

    debug!(
        "prepared {} environment ({} variables, WINEPREFIX={})",
        layer,
        env.len(),
        env.get("WINEPREFIX").map(String::as_str).unwrap_or("<unset>")
    );
    Ok(env)
}

fn apply_proton(env: &mut EnvMap, definition: &EnvDefinition, source: &Path) -> LaunchResult<()> {
    let proton = definition.require_proton(source)?;
    let tool = proton.tool.display().to_string();
    let compat = proton.compat_data.display().to_string();
    let game_dir = definition.game.dir.display().to_string();
    let app_id = definition.game.app_id.to_string();

    set_default(env, "TERM", "xterm");
    prepend(env, "PATH", &format!("{tool}/files/bin"), ":");
    append(
        env,
        "WINEDLLPATH",
        &format!("{tool}/files/lib64/wine:{tool}/files/lib/wine"),
        ":",
    );
    set_default(
        env,
        "LD_LIBRARY_PATH",
        &format!("{tool}/files/lib64/:{tool}/files/lib/:{game_dir}"),
    );
    set_default(env, "WINEPREFIX", &format!("{compat}/pfx"));
    if definition.sync.esync {
        set_default(env, "WINEESYNC", "1");
    }
    if definition.sync.fsync {
        set_default(env, "WINEFSYNC", "1");
    }
    set_default(env, "SteamGameId", &app_id);
    set_default(env, "SteamAppId", &app_id);
    prepend(env, "WINEDLLOVERRIDES", WINE_DLL_OVERRIDES, ";");
    set_default(
        env,
        "STEAM_COMPAT_CLIENT_INSTALL_PATH",
        &proton.steam_client.display().to_string(),
    );
    set_default(env, "WINE_LARGE_ADDRESS_AWARE", "1");
    append(
        env,
        "GST_PLUGIN_SYSTEM_PATH_1_0",
        &format!("{tool}/files/lib64/gstreamer-1.0:{tool}/files/lib/gstreamer-1.0"),
        ":",
    );
    set_default(env, "WINE_GST_REGISTRY_DIR", &format!("{compat}/gstreamer-1.0/"));
    Ok(())
}

fn apply_wine(env: &mut EnvMap, definition: &EnvDefinition) {
    if let Some(prefix) = definition.wine.prefix.as_ref() {
        set_default(env, "WINEPREFIX", &prefix.display().to_string());
    }
}

fn set_default(env: &mut EnvMap, key: &str, value: &str) {
    env.entry(key.to_string())
        .or_insert_with(|| value.to_string());
}

/// `value` goes in front of any existing entries
fn prepend(env: &mut EnvMap, key: &str, value: &str, delim: &str) {
    let joined = match env.get(key).filter(|v| !v.is_empty()) {
        Some(existing) => format!("{value}{delim}{existing}"),
        None => value.to_string(),
    };
    env.insert(key.to_string(), joined);
}

/// `value` goes after any existing entries
fn append(env: &mut EnvMap, key: &str, value: &str, delim: &str) {
    let joined = match env.get(key).filter(|v| !v.is_empty()) {
        Some(existing) => format!("{existing}{delim}{value}"),
        None => value.to_string(),
    };
    env.insert(key.to_string(), joined);
}
