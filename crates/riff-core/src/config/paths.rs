//! Standard config locations

use std::path::PathBuf;

/// Config file name inside [`config_dir`]
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// `<platform config dir>/riff`, or `./riff` when the platform has none
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("riff")
}

/// `<platform config dir>/riff/config.yaml`
pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}
