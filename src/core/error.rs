use thiserror::Error;

/// Core error types for Dropship
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// iptables command execution failed
    #[error("iptables error: {message}")]
    Iptables {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// Mutating operations need an effective UID of 0
    #[error("Root privileges are required to modify firewall rules")]
    NotRoot,

    /// The iptables binary could not be found
    #[error("iptables is not installed or not found in PATH")]
    IptablesUnavailable,

    #[error("Rule '{name}' not found in group '{group}'")]
    RuleNotFound { group: String, name: String },

    #[error("Rule '{name}' already exists in group '{group}'")]
    RuleExists { group: String, name: String },

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Translates the error into a message with suggestions for the user.
    pub fn translate(&self) -> ErrorTranslation {
        match self {
            Self::Iptables {
                message, stderr, ..
            } => IptablesErrorPattern::match_error(stderr.as_deref().unwrap_or(message)),
            Self::NotRoot => ErrorTranslation::new(self.to_string())
                .with_suggestion("Restart Dropship with elevated privileges: dropship elevate")
                .with_suggestion("Or run it directly as root: sudo dropship"),
            Self::IptablesUnavailable => IptablesErrorPattern::match_error("command not found"),
            _ => ErrorTranslation::new(self.to_string()),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub help_url: Option<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            help_url: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }
}

impl std::fmt::Display for ErrorTranslation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_message)?;
        for suggestion in &self.suggestions {
            write!(f, "\n  • {suggestion}")?;
        }
        if let Some(url) = &self.help_url {
            write!(f, "\n  See: {url}")?;
        }
        Ok(())
    }
}

/// Database of iptables error patterns and their translations
pub struct IptablesErrorPattern;

impl IptablesErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("you must be root")
        {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Restart Dropship with elevated privileges: dropship elevate")
                .with_suggestion("Check if CAP_NET_ADMIN capability is available")
                .with_help("https://wiki.archlinux.org/title/Polkit");
        }

        // Missing iptables
        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("iptables is not installed or not found in PATH")
                .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install iptables-nft  (Fedora/RHEL)")
                .with_suggestion("Or: sudo pacman -S iptables-nft  (Arch)")
                .with_help("https://wiki.archlinux.org/title/Iptables");
        }

        // Another process holds the xtables lock
        if lower.contains("xtables lock") || lower.contains("resource temporarily unavailable") {
            return ErrorTranslation::new("Firewall tables are locked by another process")
                .with_suggestion("Another firewall manager may be modifying iptables")
                .with_suggestion("Wait a moment and try again")
                .with_suggestion(
                    "Check for conflicting firewall managers: sudo systemctl status firewalld ufw",
                );
        }

        // Missing chain or rule (-D/-C/-X on something that isn't there)
        if lower.contains("no chain/target/match by that name")
            || lower.contains("does a matching rule exist")
            || (lower.contains("chain") && lower.contains("does not exist"))
        {
            return ErrorTranslation::new("Firewall chain or rule not found")
                .with_suggestion("The rule may already have been removed")
                .with_suggestion("List the group to see what is currently installed: dropship list")
                .with_help("https://wiki.archlinux.org/title/Iptables#Chains");
        }

        // Chain still referenced or not empty
        if lower.contains("too many links") || lower.contains("directory not empty") {
            return ErrorTranslation::new("Firewall chain is still in use")
                .with_suggestion("Remove the OUTPUT jump before deleting the chain")
                .with_suggestion("Or delete the whole group: dropship group delete <group>");
        }

        // Conflicting chains
        if lower.contains("chain already exists") || lower.contains("file exists") {
            return ErrorTranslation::new("Conflicting firewall chain")
                .with_suggestion("A chain with this name already exists")
                .with_suggestion("Pick a different group name or delete the existing group");
        }

        // Invalid address
        if lower.contains("host/network")
            || lower.contains("invalid mask")
            || lower.contains("bad argument")
        {
            return ErrorTranslation::new("Invalid IP address or network")
                .with_suggestion("Use proper IPv4 format: 192.168.1.1 or 192.168.1.0/24")
                .with_suggestion("Check CIDR notation: the prefix must be between /0 and /32")
                .with_help("https://en.wikipedia.org/wiki/Classless_Inter-Domain_Routing");
        }

        // Comment match not compiled into the kernel
        if lower.contains("couldn't load match") && lower.contains("comment") {
            return ErrorTranslation::new("The iptables comment match is unavailable")
                .with_suggestion("Load the comment module: sudo modprobe xt_comment")
                .with_suggestion("Check kernel modules: lsmod | grep xt_comment");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Firewall error: {}", msg.trim()))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify iptables is working: sudo iptables -L -n")
            .with_help("https://wiki.archlinux.org/title/Iptables")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
