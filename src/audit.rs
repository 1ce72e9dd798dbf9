/// Audit logging for privileged operations
///
/// Every firewall mutation and elevation restart is appended to a JSON-lines
/// file in the state directory, successful or not.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const AUDIT_FILE: &str = "audit.log";

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CreateRule,
    UpdateAddresses,
    ToggleRule,
    DeleteRule,
    ToggleGroup,
    DeleteGroup,
    /// Logged before pkexec is spawned
    RestartRequested,
    /// Outcome of the elevated run
    RestartElevated,
    Download,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Opens the audit log in the state directory.
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let log_path = crate::utils::get_state_dir()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
            })?
            .join(AUDIT_FILE);

        Ok(Self { log_path })
    }

    pub fn with_path(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(&event)?;

        if let Some(dir) = self.log_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be read. Malformed lines are skipped.
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(count)
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Records an event in the default audit log when `enabled`.
///
/// Failures to write are logged and otherwise ignored; auditing never blocks
/// the operation being audited.
pub async fn log_event<T>(
    enabled: bool,
    event_type: EventType,
    details: serde_json::Value,
    result: &Result<T, impl std::fmt::Display>,
) {
    if let Some(audit) = open_default(enabled) {
        record(&audit, event_type, details, result).await;
    }
}

/// The default audit log, or `None` when auditing is off or unavailable.
pub fn open_default(enabled: bool) -> Option<AuditLog> {
    if !enabled {
        return None;
    }
    AuditLog::new()
        .inspect_err(|e| tracing::warn!("Audit log unavailable: {e}"))
        .ok()
}

/// Audits an elevated restart around `restart`, which resolves to the exit
/// code of the elevated process.
///
/// The request is written before `restart` is polled, since a successful
/// restart ends this process. A non-zero exit code (pkexec uses 126 and 127
/// for a dismissed or denied prompt) is recorded as a failure.
pub async fn record_restart<F, E>(
    audit: Option<&AuditLog>,
    details: serde_json::Value,
    restart: F,
) -> Result<i32, E>
where
    F: Future<Output = Result<i32, E>>,
    E: std::fmt::Display,
{
    if let Some(audit) = audit {
        let requested: Result<(), String> = Ok(());
        record(audit, EventType::RestartRequested, details.clone(), &requested).await;
    }

    let result = restart.await;

    if let Some(audit) = audit {
        let outcome = match &result {
            Ok(0) => Ok(()),
            Ok(code) => Err(format!("Elevated process exited with status {code}")),
            Err(e) => Err(e.to_string()),
        };
        let mut details = details;
        if let Ok(code) = &result {
            details["exit_code"] = (*code).into();
        }
        record(audit, EventType::RestartElevated, details, &outcome).await;
    }
    result
}

/// Records an event in a specific audit log.
pub async fn record<T>(
    audit: &AuditLog,
    event_type: EventType,
    details: serde_json::Value,
    result: &Result<T, impl std::fmt::Display>,
) {
    let event = AuditEvent::new(
        event_type,
        result.is_ok(),
        details,
        result.as_ref().err().map(ToString::to_string),
    );

    if let Err(e) = audit.log(event).await {
        tracing::warn!("Failed to write audit log: {}", e);
    }
}
