//! Dropship - outbound traffic blocker
//!
//! Blocks outgoing traffic to chosen IPv4 ranges with iptables. Rules live in
//! per-group `DROPSHIP_<group>` chains hooked into `OUTPUT`, so every rule and
//! every group can be switched on and off without losing its addresses.
//!
//! # Architecture
//!
//! - [`core`] - Rule model and the iptables backend
//! - [`elevation`] - Root detection and restart through `pkexec`
//! - [`http`] - Text and file downloads
//! - [`audit`] - Audit logging for all privileged operations
//! - [`validators`] - Input validation and sanitization
//! - [`config`] - Configuration persistence
//! - [`utils`] - XDG directories and resource lookup
//!
//! # Example
//!
//! ```no_run
//! use dropship::{Firewall, FirewallRule};
//!
//! # async fn demo() -> dropship::Result<()> {
//! let firewall = Firewall::system();
//! firewall.initialize().await?;
//!
//! let rule = FirewallRule::new("games", "steam")
//!     .with_description("Valve content servers")
//!     .with_addresses(["208.64.200.0/22".parse().unwrap()]);
//! firewall.create_rule(&rule).await?;
//! # Ok(())
//! # }
//! ```

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod http;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::iptables::Firewall;
pub use core::rule::FirewallRule;
pub use core::runner::{CommandOutput, CommandRunner, SystemRunner};
