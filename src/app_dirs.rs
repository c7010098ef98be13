//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! # Environment Overrides
//!
//! - `LIPSYNC_CONFIG_DIR`: overrides [`config_dir`]
//! - `LIPSYNC_DATA_DIR`: overrides [`data_dir`]

use std::path::PathBuf;

/// Application data root directory (logs live underneath).
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("LIPSYNC_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("avatar-lipsync"))
        .unwrap_or_else(|| PathBuf::from("/tmp/avatar-lipsync-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("LIPSYNC_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("avatar-lipsync"))
        .unwrap_or_else(|| PathBuf::from("/tmp/avatar-lipsync-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_is_under_config_dir() {
        let file = config_file();
        assert!(file.starts_with(config_dir()));
        assert!(file.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn logs_dir_is_under_data_dir() {
        assert!(logs_dir().starts_with(data_dir()));
        assert!(logs_dir().ends_with("logs"));
    }
}
