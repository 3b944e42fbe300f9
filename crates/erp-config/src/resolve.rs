//! Locating the config file.

use std::path::{Path, PathBuf};

/// The config file chosen for this run, if any.
#[derive(Debug, Clone, Default)]
pub struct ConfigPath {
    /// `None` when nothing was found and defaults apply.
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    CliArgument,
    Environment,
    XdgConfig,
    SystemConfig,
    #[default]
    BuiltinDefault,
}

impl ConfigSource {
    pub fn describe(self) -> &'static str {
        match self {
            ConfigSource::CliArgument => "--config flag",
            ConfigSource::Environment => "environment",
            ConfigSource::XdgConfig => "user config dir",
            ConfigSource::SystemConfig => "system config dir",
            ConfigSource::BuiltinDefault => "built-in defaults",
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// Full path of the config file.
pub const ENV_CONFIG_PATH: &str = "ERP_CONFIG";
/// Directory holding [`CONFIG_FILENAME`].
pub const ENV_CONFIG_DIR: &str = "ERP_CONFIG_DIR";

pub const CONFIG_FILENAME: &str = "erp.json";

const APP_DIR: &str = "fabric-erp";

/// Every place a config file may live, strongest first.
fn candidates(cli_path: Option<&Path>) -> Vec<(PathBuf, ConfigSource)> {
    let env = |key: &str| std::env::var_os(key).map(PathBuf::from);

    let mut out = Vec::with_capacity(5);
    out.extend(cli_path.map(|p| (p.to_path_buf(), ConfigSource::CliArgument)));
    out.extend(env(ENV_CONFIG_PATH).map(|p| (p, ConfigSource::Environment)));
    out.extend(env(ENV_CONFIG_DIR).map(|d| (d.join(CONFIG_FILENAME), ConfigSource::Environment)));
    out.extend(xdg_config_dir().map(|d| (d.join(CONFIG_FILENAME), ConfigSource::XdgConfig)));
    out.push((system_config_dir().join(CONFIG_FILENAME), ConfigSource::SystemConfig));
    out
}

/// Pick the first existing candidate: the `--config` path, `ERP_CONFIG`,
/// `ERP_CONFIG_DIR/erp.json`, the user config dir, then `/etc/fabric-erp`.
/// A candidate that does not exist is skipped, not an error.
pub fn resolve_config(cli_path: Option<&Path>) -> ConfigPath {
    candidates(cli_path)
        .into_iter()
        .find(|(path, _)| path.is_file())
        .map(|(path, source)| ConfigPath {
            path: Some(path),
            source,
        })
        .unwrap_or_default()
}

/// `~/.config/fabric-erp` or the platform equivalent.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR))
}

pub fn system_config_dir() -> PathBuf {
    Path::new("/etc").join(APP_DIR)
}
