//! Utility functions for directory management and system integration
//!
//! This module provides helper functions following the XDG Base Directory specification
//! for portable configuration and data storage across Linux distributions.
//!
//! # Directory Structure
//!
//! - Data: `~/.local/share/dropship/` - Configuration (`config.json`)
//! - State: `~/.local/state/dropship/` - Audit log and GUI log file
//! - Resources: fonts and other assets, see [`resolve_resource_dir`]
//!
//! # Example
//!
//! ```
//! use dropship::utils::{get_data_dir, get_state_dir, ensure_dirs};
//!
//! // Ensure directories exist before use
//! ensure_dirs().expect("Failed to create directories");
//!
//! if let Some(data_path) = get_data_dir() {
//!     // Load configuration from data_path
//! }
//! ```

use directories::ProjectDirs;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "dropship";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", APP_NAME, APP_NAME)
}

pub fn get_data_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.data_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(Path::to_path_buf))
}

/// Creates the data and state directories with mode 0700.
///
/// # Errors
///
/// Returns `Err` if a directory cannot be created.
pub fn ensure_dirs() -> std::io::Result<()> {
    use std::fs::DirBuilder;
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = DirBuilder::new();
    builder.mode(0o700); // User read/write/execute only
    builder.recursive(true);

    if let Some(dir) = get_data_dir() {
        builder.create(dir)?;
    }
    if let Some(dir) = get_state_dir() {
        builder.create(dir)?;
    }

    Ok(())
}

/// Directories searched for bundled resources, highest priority first.
///
/// `lookup` resolves environment variables; entries whose variable is unset
/// are skipped. The current directory is always the final candidate.
pub fn resource_candidates<F>(lookup: F, cwd: &Path) -> Vec<PathBuf>
where
    F: Fn(&str) -> Option<OsString>,
{
    let mut candidates = Vec::new();

    // AppImage mount point
    if let Some(appdir) = lookup("APPDIR") {
        candidates.push(PathBuf::from(appdir).join("usr/share").join(APP_NAME));
    }
    if let Some(data_home) = lookup("XDG_DATA_HOME") {
        candidates.push(PathBuf::from(data_home).join(APP_NAME));
    }
    if let Some(home) = lookup("HOME") {
        candidates.push(PathBuf::from(home).join(".local/share").join(APP_NAME));
    }
    candidates.push(Path::new("/usr/share").join(APP_NAME));
    candidates.push(cwd.to_path_buf());

    candidates
}

/// First candidate that exists as a directory, or the last candidate.
pub fn resolve_resource_dir(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|dir| dir.is_dir())
        .or_else(|| candidates.last())
        .cloned()
}

/// Resource directory for the running process.
pub fn resource_dir() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let candidates = resource_candidates(|var| std::env::var_os(var), &cwd);
    resolve_resource_dir(&candidates).unwrap_or(cwd)
}

/// Truncates a string to at most `max_chars` characters and appends an
/// ellipsis if anything was cut.
pub fn truncate_string(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}
