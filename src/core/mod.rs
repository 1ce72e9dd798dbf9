//! Core firewall management functionality
//!
//! This module contains the core types and logic for managing iptables rules.
//! It provides:
//!
//! - [`rule`]: The firewall rule model and its chain-entry mapping
//! - [`iptables`]: Rule CRUD over `DROPSHIP_<group>` chains
//! - [`runner`]: Process execution seam used by the backend
//! - [`error`]: Error types for firewall operations

pub mod error;
pub mod iptables;
pub mod rule;
pub mod runner;

#[cfg(test)]
pub mod test_helpers;

#[cfg(test)]
mod tests;
