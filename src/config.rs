use crate::utils::get_data_dir;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";

/// Group shown on the dashboard when none is configured
pub const DEFAULT_GROUP: &str = "Dropship";

pub const DEFAULT_TEST_URL: &str = "https://httpbin.org/get";

pub const DEFAULT_PREVIEW_CHARS: usize = 200;

/// Persistent application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_group")]
    pub default_group: String,
    /// URL fetched by the dashboard's download test
    #[serde(default = "default_test_url")]
    pub test_url: String,
    /// Characters of the downloaded body shown in the result popup
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    /// GUI logs to `<state dir>/dropship.log` instead of stderr
    #[serde(default = "default_true")]
    pub log_to_file: bool,
    #[serde(default = "default_true")]
    pub audit_log_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_group: default_group(),
            test_url: default_test_url(),
            preview_chars: DEFAULT_PREVIEW_CHARS,
            log_to_file: true,
            audit_log_enabled: true,
        }
    }
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_test_url() -> String {
    DEFAULT_TEST_URL.to_string()
}

fn default_preview_chars() -> usize {
    DEFAULT_PREVIEW_CHARS
}

fn default_true() -> bool {
    true
}

pub fn config_path() -> Option<PathBuf> {
    get_data_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Saves the config to `path` using an atomic write pattern.
/// 1. Writes to a temporary file in the same directory (mode 0o600).
/// 2. Syncs it to disk.
/// 3. Atomically renames it over the target path.
///
/// # Errors
///
/// Returns `Err` if the directory is missing or unwritable, or serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let json = serde_json::to_string_pretty(config)?;

    // tempfile creates with 0o600 on Unix, so the file is never world-readable
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e.error
        }
    })?;
    Ok(())
}

/// Saves the config into the data directory.
///
/// # Errors
///
/// Returns `Err` if the data directory cannot be created or written.
pub fn save_config(config: &AppConfig) -> std::io::Result<()> {
    let Some(path) = config_path() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Data directory not found",
        ));
    };
    crate::utils::ensure_dirs()?;
    save_config_to(config, &path)
}

/// Loads the config from `path`, falling back to defaults when the file is
/// missing or unreadable.
pub fn load_config_from(path: &Path) -> AppConfig {
    match std::fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::warn!("Ignoring invalid config {}: {e}", path.display());
            AppConfig::default()
        }),
        Err(_) => AppConfig::default(),
    }
}

/// Loads the config from the data directory, or returns defaults.
pub fn load_config() -> AppConfig {
    config_path().map_or_else(AppConfig::default, |path| load_config_from(&path))
}
