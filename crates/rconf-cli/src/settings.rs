use std::path::{Path, PathBuf};

use color_eyre::Result;
use dirs::{config_dir, home_dir};
use rconf_storage::{
    store::{StoreOptions, DEFAULT_LOW_LEVEL_RETRIES},
    KeySettings,
};

use crate::cli::Cli;

pub const CONFIG_FILE_NAME: &str = "rclone.conf";
pub const HIDDEN_CONFIG_FILE_NAME: &str = ".rclone.conf";

/// Runtime settings resolved from flags, environment and platform directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub config_path: PathBuf,
    pub store: StoreOptions,
    pub keys: KeySettings,
}

pub fn resolve(cli: &Cli) -> Result<Settings> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_path()?,
    };

    let mut keys = KeySettings::from_env();
    if cli.no_ask_password {
        keys.ask_password = false;
    }

    Ok(Settings {
        config_path,
        store: StoreOptions {
            low_level_retries: cli.low_level_retries.unwrap_or(DEFAULT_LOW_LEVEL_RETRIES),
            ..StoreOptions::default()
        },
        keys,
    })
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    pick_default(config_dir(), home_dir())
}

/// Prefer `<config dir>/rclone/rclone.conf`; fall back to an existing
/// `~/.rclone.conf`, then to `./.rclone.conf` when no directories are known.
fn pick_default(config_base: Option<PathBuf>, home: Option<PathBuf>) -> Result<PathBuf> {
    let primary = config_base.map(|base| base.join("rclone").join(CONFIG_FILE_NAME));
    let hidden = home.map(|home| home.join(HIDDEN_CONFIG_FILE_NAME));

    if let Some(path) = primary.as_deref().filter(|p| p.exists()) {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = hidden.as_deref().filter(|p| p.exists()) {
        return Ok(path.to_path_buf());
    }
    match primary.or(hidden) {
        Some(path) => Ok(path),
        None => {
            tracing::error!("couldn't find a config or home directory, using current directory");
            Ok(Path::new(HIDDEN_CONFIG_FILE_NAME).to_path_buf())
        }
    }
}
