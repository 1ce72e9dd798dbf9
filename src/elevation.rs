//! Privilege elevation for firewall management
//!
//! Dropship needs root to touch iptables. Rather than elevating each
//! command, the whole program is restarted through `pkexec`, carrying the
//! display environment along so the GUI can open on the user's session.
//!
//! # Restart Command
//!
//! ```text
//! pkexec env DISPLAY=:0 XAUTHORITY=/run/user/1000/.Xauthority ... /usr/bin/dropship <args>
//! ```
//!
//! # Environment Variables
//!
//! - `DROPSHIP_TEST_NO_ELEVATION`: Treat the process as privileged (for testing only).

use crate::audit::{AuditLog, record_restart};
use std::convert::Infallible;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Variables forwarded through `pkexec`, which otherwise scrubs the environment
pub const PRESERVED_ENV_VARS: [&str; 6] = [
    "DISPLAY",
    "XAUTHORITY",
    "WAYLAND_DISPLAY",
    "XDG_RUNTIME_DIR",
    "DBUS_SESSION_BUS_ADDRESS",
    "XDG_SESSION_TYPE",
];

pub const TEST_NO_ELEVATION_ENV: &str = "DROPSHIP_TEST_NO_ELEVATION";

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    /// `/proc/self/exe` and `current_exe` both failed
    #[error("Cannot determine the path of the running executable: {0}")]
    ExecutableNotFound(std::io::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether the effective UID is root.
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Whether firewall mutations may proceed: root, or test mode.
pub fn has_privileges() -> bool {
    std::env::var_os(TEST_NO_ELEVATION_ENV).is_some() || is_root()
}

/// Path of the running executable.
///
/// # Errors
///
/// Returns `Err` if neither `/proc/self/exe` nor `current_exe` resolves.
pub fn executable_path() -> Result<PathBuf, ElevationError> {
    std::fs::read_link("/proc/self/exe")
        .or_else(|_| std::env::current_exe())
        .map_err(ElevationError::ExecutableNotFound)
}

/// Checks if a binary exists in PATH
///
/// # Arguments
///
/// * `name` - Binary name to search for (e.g., "pkexec", "iptables")
///
/// # Returns
///
/// `true` if the binary is found in PATH, `false` otherwise
pub fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

pub fn is_pkexec_available() -> bool {
    binary_exists("pkexec")
}

/// Builds the full `pkexec env ...` command line for a restart.
///
/// Only variables that `lookup` returns are forwarded, in the order of
/// [`PRESERVED_ENV_VARS`].
pub fn restart_command<F>(exe: &Path, args: &[OsString], lookup: F) -> Vec<OsString>
where
    F: Fn(&str) -> Option<OsString>,
{
    let mut command: Vec<OsString> = vec!["pkexec".into(), "env".into()];

    for var in PRESERVED_ENV_VARS {
        if let Some(value) = lookup(var) {
            let mut assignment = OsString::from(var);
            assignment.push("=");
            assignment.push(value);
            command.push(assignment);
        }
    }

    command.push(exe.as_os_str().to_os_string());
    command.extend(args.iter().cloned());
    command
}

/// Runs Dropship as root through `pkexec` and waits for it.
///
/// Returns the exit code of the elevated process.
///
/// # Errors
///
/// - `ElevationError::PkexecNotFound` if pkexec is not installed
/// - `ElevationError::ExecutableNotFound` if our own path can't be resolved
/// - `ElevationError::Io` if pkexec cannot be spawned
pub async fn run_elevated(args: &[OsString]) -> Result<i32, ElevationError> {
    if !is_pkexec_available() {
        return Err(ElevationError::PkexecNotFound);
    }

    let exe = executable_path()?;
    let command = restart_command(&exe, args, |var| std::env::var_os(var));
    info!("Restarting with elevated privileges: {}", exe.display());

    let status = tokio::process::Command::new(&command[0])
        .args(&command[1..])
        .status()
        .await
        .map_err(|e| {
            error!("Failed to spawn pkexec: {e}");
            ElevationError::Io(e)
        })?;

    let code = status.code().unwrap_or(1);
    info!("Elevated process finished with status {code}");
    Ok(code)
}

/// Restarts Dropship as root through `pkexec`, recording the attempt and its
/// outcome in `audit`.
///
/// Exits the current process with the elevated one's exit code, so this only
/// ever returns on failure.
///
/// # Errors
///
/// See [`run_elevated`].
pub async fn restart_with_pkexec(
    args: &[OsString],
    audit: Option<&AuditLog>,
) -> Result<Infallible, ElevationError> {
    let details = serde_json::json!({ "args": args.len() });
    let code = record_restart(audit, details, run_elevated(args)).await?;
    std::process::exit(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ENV_VAR_MUTEX;

    #[test]
    fn test_binary_exists() {
        // sh should exist on all Unix systems
        assert!(binary_exists("sh"));
        // This should not exist
        assert!(!binary_exists("dropship_nonexistent_binary_xyz"));
    }

    #[test]
    fn test_restart_command_forwards_only_set_vars() {
        let exe = Path::new("/opt/dropship/dropship");
        let command = restart_command(exe, &[], |var| match var {
            "DISPLAY" => Some(":0".into()),
            "XAUTHORITY" => Some("/home/me/.Xauthority".into()),
            _ => None,
        });

        assert_eq!(
            command,
            [
                "pkexec",
                "env",
                "DISPLAY=:0",
                "XAUTHORITY=/home/me/.Xauthority",
                "/opt/dropship/dropship",
            ]
            .map(OsString::from)
        );
    }

    #[test]
    fn test_restart_command_keeps_var_order_and_args() {
        let exe = Path::new("/usr/bin/dropship");
        let args = [OsString::from("list"), OsString::from("games")];
        let command = restart_command(exe, &args, |var| Some(format!("v-{var}").into()));

        let rendered: Vec<String> = command
            .iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect();
        assert_eq!(rendered[2], "DISPLAY=v-DISPLAY");
        assert_eq!(rendered[7], "XDG_SESSION_TYPE=v-XDG_SESSION_TYPE");
        assert_eq!(rendered[8..], ["/usr/bin/dropship", "list", "games"]);
    }

    #[test]
    fn test_executable_path_resolves() {
        let path = executable_path().unwrap();
        assert!(path.is_absolute());
    }

    #[test]
    fn test_test_mode_grants_privileges() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();

        unsafe {
            std::env::set_var(TEST_NO_ELEVATION_ENV, "1");
        }
        assert!(has_privileges());

        unsafe {
            std::env::remove_var(TEST_NO_ELEVATION_ENV);
        }
        assert_eq!(has_privileges(), is_root());
    }
}
