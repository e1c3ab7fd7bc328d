use std::time::Duration;

pub const ENV_FILE_ENV: &str = "NSDBG_ENV_FILE";
pub const ENV_FILE_NAME: &str = "nsdbg.toml";
pub const CONFIG_DIRECTORY: &str = "nsdbg";
pub const CONFIG_FILE_NAME: &str = "env.toml";

pub const TITANFALL2_APPID: u32 = 1237970;
pub const DEFAULT_TARGET_EXE: &str = "NorthstarLauncher.exe";
pub const DEFAULT_WINE_BIN: &str = "wine";
pub const WINEDBG_BIN: &str = "winedbg";

pub const POLL_INTERVAL_DEFAULT: Duration = Duration::from_millis(100);
pub const ATTACH_TIMEOUT_DEFAULT: Duration = Duration::from_secs(120);
// Grace period between SIGTERM and SIGKILL
pub const TERMINATE_GRACE: Duration = Duration::from_millis(500);

// Linux truncates /proc/<pid>/stat comm to 15 bytes
pub const COMM_MAX_LEN: usize = 15;

/// Forced on every child regardless of the definition file.
pub const FIXED_ENV_OVERRIDES: &[(&str, &str)] = &[("DXVK_LOG_LEVEL", "none")];
/// Only applied when neither the ambient env nor the definition file set them.
pub const DEFAULT_ENV: &[(&str, &str)] = &[("WINEDEBUG", "-all")];

pub const WINE_DLL_OVERRIDES: &str = "wsock32=n,b;steam.exe=b;dotnetfx35.exe=b;dotnetfx35setup.exe=b;beclient.dll=b,n;beclient_x64.dll=b,n;d3d11=n;d3d10core=n;d3d9=n;dxgi=n;d3d12=n;d3d12core=n";

// EA Desktop companion app
pub const EA_PROCESS_NAMES: &[&str] = &["EADesktop.exe", "EABackgroundSer"];
pub const EA_DESKTOP_DIR: &[&str] = &["Program Files", "Electronic Arts", "EA Desktop", "EA Desktop"];
pub const EA_DESKTOP_EXE: &str = "EADesktop.exe";
pub const EA_INSTALLER: &[&str] = &["__Installer", "Origin", "redist", "internal", "EAappInstaller.exe"];
pub const EA_LINK_URL: &str = "link2ea://launchgame/0?platform=steam&theme=tf2";
pub const EA_SETTLE_DELAY: Duration = Duration::from_secs(5);

// x64dbg is unpacked into <cache>/nsdbg/x64dbg when no path is configured
pub const X64DBG_CACHE_DIR: &str = "x64dbg";
pub const X64DBG_EXE_PATH: &[&str] = &["release", "x64", "x64dbg.exe"];
pub const X64DBG_DOWNLOAD_URL: &str = "https://sourceforge.net/projects/x64dbg/files/latest/download";
