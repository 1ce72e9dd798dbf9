//! Firewall rule model and its mapping onto iptables chain entries
//!
//! A group owns one chain, `DROPSHIP_<group>`, jumped to from `OUTPUT`.
//! Every blocked address of a rule is one entry in that chain, tagged with a
//! comment carrying the rule name and description:
//!
//! ```text
//! -A DROPSHIP_games -d 155.133.224.0/19 -m comment --comment "steam: Valve EU" -j DROP
//! ```
//!
//! Disabled rules keep their entries but drop the `-j DROP` target, so the
//! addresses survive a disable/enable cycle.

use crate::core::error::{Error, Result};
use crate::validators;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

/// Prefix for every chain Dropship owns
pub const CHAIN_PREFIX: &str = "DROPSHIP_";

/// Kernel limit on chain names (`XT_EXTENSION_MAXNAMELEN` minus the NUL byte)
pub const MAX_CHAIN_NAME_LEN: usize = 28;

/// Built-in chain the group chains hang off
pub const OUTPUT_CHAIN: &str = "OUTPUT";

pub const DROP_TARGET: &str = "DROP";

/// Separates the rule name from its description inside an entry comment
const COMMENT_SEPARATOR: &str = ": ";

/// A named set of blocked destinations inside a group
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    pub group: String,
    pub description: String,
    /// Destination networks (CIDR notation)
    pub blocked_addresses: Vec<Ipv4Network>,
    pub enabled: bool,
}

impl FirewallRule {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            description: String::new(),
            blocked_addresses: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_addresses(mut self, addresses: impl IntoIterator<Item = Ipv4Network>) -> Self {
        self.blocked_addresses = addresses.into_iter().collect();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Name of the chain holding this rule's entries
    pub fn chain(&self) -> String {
        chain_name(&self.group)
    }

    /// Checks names and addresses, and sanitizes the description in place.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` naming the offending field.
    pub fn validate(&mut self) -> Result<()> {
        validators::validate_group(&self.group).map_err(|m| Error::validation("group", m))?;
        validators::validate_rule_name(&self.name).map_err(|m| Error::validation("name", m))?;
        validators::validate_blocked_addresses(&self.blocked_addresses)
            .map_err(|m| Error::validation("blocked_addresses", m))?;
        self.description = validators::sanitize_description(&self.description);
        Ok(())
    }

    /// The comment text stored on each of this rule's entries
    pub fn comment(&self) -> String {
        if self.description.is_empty() {
            self.name.clone()
        } else {
            format!("{}{COMMENT_SEPARATOR}{}", self.name, self.description)
        }
    }

    /// Chain entries this rule should have in the kernel
    pub fn entries(&self) -> Vec<ChainEntry> {
        let comment = self.comment();
        let target = self.enabled.then(|| DROP_TARGET.to_string());
        self.blocked_addresses
            .iter()
            .map(|address| ChainEntry {
                address: *address,
                comment: Some(comment.clone()),
                target: target.clone(),
            })
            .collect()
    }
}

/// Chain name for a group
pub fn chain_name(group: &str) -> String {
    format!("{CHAIN_PREFIX}{group}")
}

/// Splits an entry comment into rule name and description.
pub fn split_comment(comment: &str) -> (&str, &str) {
    comment
        .split_once(COMMENT_SEPARATOR)
        .unwrap_or((comment, ""))
}

/// One `-A` line inside a group chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub address: Ipv4Network,
    pub comment: Option<String>,
    pub target: Option<String>,
}

impl ChainEntry {
    /// Rule specification as passed after `-A/-D/-C <chain>`
    pub fn spec(&self) -> Vec<String> {
        let mut args = vec!["-d".to_string(), self.address.to_string()];
        if let Some(comment) = &self.comment {
            args.extend([
                "-m".to_string(),
                "comment".to_string(),
                "--comment".to_string(),
                comment.clone(),
            ]);
        }
        if let Some(target) = &self.target {
            args.extend(["-j".to_string(), target.clone()]);
        }
        args
    }

    pub fn is_drop(&self) -> bool {
        self.target.as_deref() == Some(DROP_TARGET)
    }
}

/// Groups parsed chain entries back into rules, in order of first appearance.
///
/// Entries without a comment were not written by Dropship and are skipped.
pub fn rules_from_entries(group: &str, entries: &[ChainEntry]) -> Vec<FirewallRule> {
    let mut rules: Vec<FirewallRule> = Vec::new();

    for entry in entries {
        let Some(comment) = entry.comment.as_deref() else {
            tracing::debug!("Skipping foreign entry in {}: {:?}", chain_name(group), entry);
            continue;
        };
        let (name, description) = split_comment(comment);

        if let Some(rule) = rules.iter_mut().find(|r| r.name == name) {
            rule.blocked_addresses.push(entry.address);
            rule.enabled &= entry.is_drop();
        } else {
            rules.push(FirewallRule {
                name: name.to_string(),
                group: group.to_string(),
                description: description.to_string(),
                blocked_addresses: vec![entry.address],
                enabled: entry.is_drop(),
            });
        }
    }

    rules
}
