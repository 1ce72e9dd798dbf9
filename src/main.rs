//! Dropship - outbound traffic blocker
//!
//! Blocks outgoing connections to chosen IPv4 ranges using iptables, from a
//! small dashboard or from the command line.
//!
//! # Security
//!
//! - Firewall changes require root; the GUI offers a restart through pkexec
//! - All inputs validated before any iptables command runs
//! - Audit trail of all privileged operations
//! - Failed multi-entry changes roll back what they already applied
//!
//! # Usage
//!
//! ```bash
//! # Run the GUI application
//! dropship
//!
//! # CLI commands
//! dropship status                                   # Privileges, iptables, build info
//! dropship list games                               # Rules in a group
//! dropship create games steam --block 155.133.224.0/19 --description "Valve EU"
//! dropship disable games steam                      # Keep addresses, stop blocking
//! dropship group disable games                      # Unhook the whole group
//! dropship download https://example.com/ranges.txt --output ranges.txt
//! ```

mod app;

use clap::{Parser, Subcommand};
use dropship::audit::{self, EventType};
use dropship::config::AppConfig;
use dropship::elevation::{self, ElevationError};
use dropship::http::{self, HttpError};
use dropship::utils::truncate_string;
use dropship::validators::{self, parse_blocked_address};
use dropship::{CommandRunner, Firewall, FirewallRule};
use ipnetwork::Ipv4Network;
use iced::Size;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

shadow_rs::shadow!(build);

const LOG_FILE: &str = "dropship.log";

/// Descriptions longer than this are shortened in `list` output
const LIST_DESCRIPTION_CHARS: usize = 40;

#[derive(Parser)]
#[command(name = "dropship", version)]
#[command(about = "Dropship - block outbound traffic with iptables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show privileges, iptables availability and build info
    Status,
    /// List the rules of a group
    List {
        /// Group name (defaults to the configured group)
        group: Option<String>,
    },
    /// Create a rule blocking one or more IPv4 ranges
    Create {
        group: String,
        name: String,
        /// Address or CIDR range to block (repeatable)
        #[arg(short, long = "block", value_name = "CIDR", required = true, value_parser = parse_blocked_address)]
        blocks: Vec<Ipv4Network>,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Create the rule without activating it
        #[arg(long)]
        disabled: bool,
    },
    /// Replace the blocked ranges of a rule
    SetAddresses {
        group: String,
        name: String,
        #[arg(required = true, value_parser = parse_blocked_address)]
        addresses: Vec<Ipv4Network>,
    },
    /// Start blocking a rule's addresses
    Enable { group: String, name: String },
    /// Stop blocking a rule's addresses without forgetting them
    Disable { group: String, name: String },
    /// Delete a rule
    Delete { group: String, name: String },
    /// Group-wide operations
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Download a URL, printing it or saving it to a file
    Download {
        url: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Restart this command with root privileges through pkexec
    Elevate {
        /// Arguments for the elevated run (starts the GUI when empty)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<OsString>,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    /// Hook the group's chain into OUTPUT
    Enable { group: String },
    /// Unhook the group's chain from OUTPUT
    Disable { group: String },
    /// Remove the group and all of its rules
    Delete { group: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Firewall(#[from] dropship::Error),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Elevation(#[from] ElevationError),
}

impl CliError {
    fn report(&self) -> String {
        match self {
            Self::Firewall(e) => e.translate().to_string(),
            other => other.to_string(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = dropship::utils::ensure_dirs() {
        eprintln!("Warning: could not create data directories: {e}");
    }
    let config = dropship::config::load_config();
    // First run: write the defaults out so there is a file to edit
    if dropship::config::config_path().is_some_and(|path| !path.exists())
        && let Err(e) = dropship::config::save_config(&config)
    {
        eprintln!("Warning: could not write default configuration: {e}");
    }

    if !elevation::is_root() {
        eprintln!(
            "Warning: not running as root, firewall changes will fail. \
             Run `pkexec {}` or `dropship elevate` to elevate.",
            elevation::executable_path()
                .map_or_else(|_| "dropship".to_string(), |p| p.display().to_string())
        );
    }

    if let Some(command) = cli.command {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(tracing::Level::WARN)
            .init();

        // Create Tokio runtime only for CLI commands
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                eprintln!("Error: failed to start async runtime: {e}");
                return ExitCode::FAILURE;
            }
        };
        match runtime.block_on(handle_cli(command, &config)) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e.report());
                ExitCode::FAILURE
            }
        }
    } else {
        // GUI runs in normal sync context (Iced has its own async runtime)
        launch_gui(&config)
    }
}

/// Runs a firewall mutation and records it in the audit log.
async fn audited(
    config: &AppConfig,
    event_type: EventType,
    details: serde_json::Value,
    result: dropship::Result<()>,
) -> Result<(), CliError> {
    audit::log_event(config.audit_log_enabled, event_type, details, &result).await;
    result.map_err(CliError::from)
}

async fn handle_cli(command: Commands, config: &AppConfig) -> Result<(), CliError> {
    let firewall = Firewall::system();

    match command {
        Commands::Status => {
            println!("Dropship {} ({})", build::PKG_VERSION, build::SHORT_COMMIT);
            println!("Built: {}", build::BUILD_TIME);
            println!(
                "Privileges: {}",
                if elevation::is_root() { "root" } else { "unprivileged" }
            );
            let available =
                firewall.initialize().await.is_ok() && firewall.is_firewall_enabled().await;
            println!(
                "iptables ({}): {}",
                firewall.program(),
                if available { "Available" } else { "Not available" }
            );
            println!(
                "pkexec: {}",
                if elevation::is_pkexec_available() { "found" } else { "missing" }
            );
            println!("Default group: {}", config.default_group);
        }
        Commands::List { group } => {
            let group = group.unwrap_or_else(|| config.default_group.clone());
            firewall.initialize().await?;
            print!("{}", describe_group(&firewall, &group).await?);
        }
        Commands::Create {
            group,
            name,
            blocks,
            description,
            disabled,
        } => {
            firewall.initialize().await?;
            let rule = FirewallRule::new(&group, &name)
                .with_description(validators::sanitize_description(&description))
                .with_addresses(blocks)
                .with_enabled(!disabled);
            let details = serde_json::json!({
                "group": group,
                "name": name,
                "addresses": rule.blocked_addresses.len(),
                "enabled": rule.enabled,
            });
            let result = firewall.create_rule(&rule).await;
            audited(config, EventType::CreateRule, details, result).await?;
            println!("✓ Created rule '{name}' in group '{group}'.");
        }
        Commands::SetAddresses {
            group,
            name,
            addresses,
        } => {
            firewall.initialize().await?;
            let details = serde_json::json!({
                "group": group,
                "name": name,
                "addresses": addresses.len(),
            });
            let result = firewall.set_rule_addresses(&group, &name, &addresses).await;
            audited(config, EventType::UpdateAddresses, details, result).await?;
            println!("✓ Rule '{name}' now blocks {} range(s).", addresses.len());
        }
        Commands::Enable { group, name } => {
            toggle_rule(&firewall, config, &group, &name, true).await?;
        }
        Commands::Disable { group, name } => {
            toggle_rule(&firewall, config, &group, &name, false).await?;
        }
        Commands::Delete { group, name } => {
            firewall.initialize().await?;
            let details = serde_json::json!({ "group": group, "name": name });
            let result = firewall.delete_rule(&group, &name).await;
            audited(config, EventType::DeleteRule, details, result).await?;
            println!("✓ Deleted rule '{name}' from group '{group}'.");
        }
        Commands::Group { action } => {
            firewall.initialize().await?;
            match action {
                GroupAction::Enable { group } => {
                    toggle_group(&firewall, config, &group, true).await?;
                }
                GroupAction::Disable { group } => {
                    toggle_group(&firewall, config, &group, false).await?;
                }
                GroupAction::Delete { group } => {
                    let details = serde_json::json!({ "group": group });
                    let result = firewall.delete_group(&group).await;
                    audited(config, EventType::DeleteGroup, details, result).await?;
                    println!("✓ Deleted group '{group}'.");
                }
            }
        }
        Commands::Download { url, output } => match output {
            Some(path) => {
                let result = http::download_file(
                    &url,
                    &path,
                    Some(|done: u64, total: u64| {
                        eprint!("\rDownloading... {:3}%", done * 100 / total);
                    }),
                )
                .await;
                eprintln!();
                audit::log_event(
                    config.audit_log_enabled,
                    EventType::Download,
                    serde_json::json!({ "url": url, "output": path }),
                    &result,
                )
                .await;
                let bytes = result?;
                println!("✓ Saved {bytes} bytes to {}.", path.display());
            }
            None => {
                print!("{}", http::download_text(&url).await?);
            }
        },
        Commands::Elevate { args } => {
            let audit = audit::open_default(config.audit_log_enabled);
            match elevation::restart_with_pkexec(&args, audit.as_ref()).await? {}
        }
    }
    Ok(())
}

async fn toggle_rule(
    firewall: &Firewall,
    config: &AppConfig,
    group: &str,
    name: &str,
    enabled: bool,
) -> Result<(), CliError> {
    firewall.initialize().await?;
    let details = serde_json::json!({ "group": group, "name": name, "enabled": enabled });
    let result = firewall.set_rule_enabled(group, name, enabled).await;
    audited(config, EventType::ToggleRule, details, result).await?;
    println!(
        "✓ Rule '{name}' {}.",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn toggle_group(
    firewall: &Firewall,
    config: &AppConfig,
    group: &str,
    enabled: bool,
) -> Result<(), CliError> {
    let details = serde_json::json!({ "group": group, "enabled": enabled });
    let result = firewall.set_group_enabled(group, enabled).await;
    audited(config, EventType::ToggleGroup, details, result).await?;
    println!(
        "✓ Group '{group}' {}.",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Renders a group for `list` from a single listing of its chain.
async fn describe_group<R: CommandRunner>(
    firewall: &Firewall<R>,
    group: &str,
) -> Result<String, CliError> {
    let rules = firewall.get_rules_in_group(group).await?;
    if rules.is_empty() {
        return Ok(format!("No rules in group '{group}'.\n"));
    }

    let active = firewall.is_group_enabled(group).await?;
    let mut out = format!(
        "Group '{group}' ({})\n",
        if active { "active" } else { "inactive" }
    );
    for rule in &rules {
        write_rule(&mut out, rule);
    }
    Ok(out)
}

fn write_rule(out: &mut String, rule: &FirewallRule) {
    let marker = if rule.enabled { "*" } else { " " };
    if rule.description.is_empty() {
        let _ = writeln!(out, "  {marker} {}", rule.name);
    } else {
        let _ = writeln!(
            out,
            "  {marker} {} - {}",
            rule.name,
            truncate_string(&rule.description, LIST_DESCRIPTION_CHARS)
        );
    }
    for address in &rule.blocked_addresses {
        let _ = writeln!(out, "      {address}");
    }
}

fn init_gui_logging(config: &AppConfig) {
    let log_file = config
        .log_to_file
        .then(dropship::utils::get_state_dir)
        .flatten()
        .and_then(|dir| std::fs::File::create(dir.join(LOG_FILE)).ok());

    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_writer(file)
            .with_ansi(false)
            .init(),
        None => tracing_subscriber::fmt::init(),
    }
}

fn launch_gui(config: &AppConfig) -> ExitCode {
    init_gui_logging(config);
    tracing::info!("Starting Dropship {} ({})", build::PKG_VERSION, build::SHORT_COMMIT);

    let result = iced::application(app::State::new, app::State::update, app::State::view)
        .subscription(app::State::subscription)
        .window(iced::window::Settings {
            size: Size::new(800.0, 600.0),
            ..Default::default()
        })
        .title("Dropship")
        .theme(|_state: &app::State| iced::Theme::Light)
        .default_font(app::FONT_REGULAR)
        .run();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("GUI exited with error: {e}");
            ExitCode::FAILURE
        }
    }
}
