//! iptables backend for firewall rules
//!
//! Translates [`FirewallRule`] operations into `iptables` invocations and
//! parses `iptables -S` output back into rules. The kernel chains are the only
//! store; nothing is cached between calls.
//!
//! # Command Layout
//!
//! ```text
//! iptables -N DROPSHIP_<group>                     # create group chain
//! iptables -C OUTPUT -j DROPSHIP_<group>           # group jump present?
//! iptables -A OUTPUT -j DROPSHIP_<group>           # hook group into OUTPUT
//! iptables -A DROPSHIP_<group> -d <cidr> -m comment --comment <name> -j DROP
//! iptables -S DROPSHIP_<group>                     # list group entries
//! ```
//!
//! # Environment Variables
//!
//! - `DROPSHIP_IPTABLES_COMMAND`: Use a different binary instead of `iptables`
//!   (for example `iptables-legacy`).

use crate::core::error::{Error, Result};
use crate::core::rule::{
    ChainEntry, FirewallRule, OUTPUT_CHAIN, chain_name, rules_from_entries, split_comment,
};
use crate::core::runner::{CommandOutput, CommandRunner, SystemRunner};
use crate::validators;
use ipnetwork::Ipv4Network;
use tracing::{debug, info, warn};

pub const DEFAULT_IPTABLES: &str = "iptables";

pub const IPTABLES_COMMAND_ENV: &str = "DROPSHIP_IPTABLES_COMMAND";

/// stderr fragments iptables prints when a chain or rule isn't there
const MISSING_PATTERNS: [&str; 3] = [
    "No chain/target/match by that name",
    "does a matching rule exist",
    "does not exist",
];

fn is_missing(output: &CommandOutput) -> bool {
    MISSING_PATTERNS
        .iter()
        .any(|pattern| output.stderr.contains(pattern))
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

/// Result of parsing `iptables -S <chain>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainListing {
    /// Destination entries, with or without a Dropship comment
    pub entries: Vec<ChainEntry>,
    /// `-A` lines that are not plain destination matches
    pub foreign_lines: usize,
}

impl ChainListing {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.foreign_lines == 0
    }
}

/// Splits an `iptables -S` line into tokens, honouring double quotes.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

/// Parses the output of `iptables -S <chain>`.
pub fn parse_chain_listing(chain: &str, output: &str) -> ChainListing {
    let mut listing = ChainListing::default();

    for line in output.lines() {
        let tokens = tokenize(line);
        if tokens.first().map(String::as_str) != Some("-A")
            || tokens.get(1).map(String::as_str) != Some(chain)
        {
            continue;
        }

        let mut address = None;
        let mut comment = None;
        let mut target = None;
        let mut negated = false;
        let mut iter = tokens[2..].iter();

        while let Some(token) = iter.next() {
            match token.as_str() {
                "!" => negated = true,
                "-d" | "--destination" => {
                    address = iter
                        .next()
                        .and_then(|v| validators::parse_blocked_address(v).ok());
                }
                "--comment" => comment = iter.next().cloned(),
                "-j" | "--jump" => target = iter.next().cloned(),
                _ => {}
            }
        }

        match address {
            Some(address) if !negated => listing.entries.push(ChainEntry {
                address,
                comment,
                target,
            }),
            _ => {
                debug!("Unrecognized entry in {chain}: {line}");
                listing.foreign_lines += 1;
            }
        }
    }

    listing
}

/// Firewall rule manager backed by `iptables`
#[derive(Debug)]
pub struct Firewall<R = SystemRunner> {
    runner: R,
    program: String,
    privileged: bool,
}

impl Firewall<SystemRunner> {
    /// Backend for the running system.
    ///
    /// Honours `DROPSHIP_IPTABLES_COMMAND` and detects privileges via
    /// [`crate::elevation::has_privileges`].
    pub fn system() -> Self {
        let program = std::env::var(IPTABLES_COMMAND_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_IPTABLES.to_string());
        Self {
            runner: SystemRunner,
            program,
            privileged: crate::elevation::has_privileges(),
        }
    }
}

impl<R: CommandRunner> Firewall<R> {
    pub fn with_runner(runner: R, privileged: bool) -> Self {
        Self {
            runner,
            program: DEFAULT_IPTABLES.to_string(),
            privileged,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    async fn exec(&self, args: &[String]) -> Result<CommandOutput> {
        debug!("{} {}", self.program, args.join(" "));
        self.runner
            .run(&self.program, args)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::IptablesUnavailable,
                _ => Error::Io(e),
            })
    }

    async fn exec_checked(&self, args: &[String]) -> Result<CommandOutput> {
        let output = self.exec(args).await?;
        if output.success() {
            return Ok(output);
        }

        let stderr = output.stderr.trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} {} failed", self.program, args.join(" "))
        } else {
            stderr.clone()
        };
        Err(Error::Iptables {
            message,
            stderr: Some(stderr),
            exit_code: output.exit_code,
        })
    }

    fn ensure_privileged(&self) -> Result<()> {
        if self.privileged {
            Ok(())
        } else {
            Err(Error::NotRoot)
        }
    }

    /// Checks that the iptables binary can be found.
    ///
    /// # Errors
    ///
    /// Returns `Error::IptablesUnavailable` when it cannot.
    pub async fn initialize(&self) -> Result<()> {
        let found = match self.runner.run("which", &[self.program.clone()]).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("`which` unavailable ({e}), searching PATH directly");
                crate::elevation::binary_exists(&self.program)
            }
        };

        if found {
            info!("Firewall backend ready ({})", self.program);
            Ok(())
        } else {
            warn!("{} not found", self.program);
            Err(Error::IptablesUnavailable)
        }
    }

    /// Nothing is held between calls; kept for symmetry with `initialize`.
    pub fn shutdown(&self) {
        debug!("Firewall backend shut down");
    }

    /// Whether iptables answers a plain listing, i.e. it is installed and we
    /// have enough access to read the tables.
    pub async fn is_firewall_enabled(&self) -> bool {
        self.exec(&args(&["-L", "-n"]))
            .await
            .is_ok_and(|output| output.success())
    }

    /// Lists the entries of a group chain; `None` if the chain doesn't exist.
    async fn list_chain(&self, chain: &str) -> Result<Option<ChainListing>> {
        let output = self.exec(&args(&["-S", chain])).await?;
        if output.success() {
            return Ok(Some(parse_chain_listing(chain, &output.stdout)));
        }
        if is_missing(&output) {
            return Ok(None);
        }
        Err(Error::Iptables {
            message: output.stderr.trim().to_string(),
            stderr: Some(output.stderr),
            exit_code: output.exit_code,
        })
    }

    /// Current entries belonging to one rule.
    async fn rule_entries(&self, group: &str, name: &str) -> Result<Vec<ChainEntry>> {
        let entries: Vec<ChainEntry> = self
            .list_chain(&chain_name(group))
            .await?
            .unwrap_or_default()
            .entries
            .into_iter()
            .filter(|e| e.comment.as_deref().is_some_and(|c| split_comment(c).0 == name))
            .collect();

        if entries.is_empty() {
            return Err(Error::RuleNotFound {
                group: group.to_string(),
                name: name.to_string(),
            });
        }
        Ok(entries)
    }

    /// Returns all rules in a group. A group without a chain has no rules.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the group name is invalid or listing fails.
    pub async fn get_rules_in_group(&self, group: &str) -> Result<Vec<FirewallRule>> {
        validators::validate_group(group).map_err(|m| Error::validation("group", m))?;
        let listing = self.list_chain(&chain_name(group)).await?;
        Ok(listing
            .map(|l| rules_from_entries(group, &l.entries))
            .unwrap_or_default())
    }

    /// Calls `callback` for every rule in a group.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the rules cannot be listed.
    pub async fn for_each_rule_in_group<F>(&self, group: &str, mut callback: F) -> Result<()>
    where
        F: FnMut(&FirewallRule),
    {
        for rule in self.get_rules_in_group(group).await? {
            callback(&rule);
        }
        Ok(())
    }

    async fn ensure_chain(&self, chain: &str) -> Result<()> {
        let output = self.exec(&args(&["-N", chain])).await?;
        if output.success() || output.stderr.contains("already exists") {
            Ok(())
        } else {
            Err(Error::Iptables {
                message: output.stderr.trim().to_string(),
                stderr: Some(output.stderr),
                exit_code: output.exit_code,
            })
        }
    }

    async fn ensure_jump(&self, chain: &str) -> Result<()> {
        let present = self
            .exec(&args(&["-C", OUTPUT_CHAIN, "-j", chain]))
            .await?
            .success();
        if !present {
            self.exec_checked(&args(&["-A", OUTPUT_CHAIN, "-j", chain]))
                .await?;
        }
        Ok(())
    }

    /// Runs a teardown step; a missing chain or rule counts as done.
    async fn exec_tolerant(&self, parts: &[&str]) -> Result<()> {
        let output = self.exec(&args(parts)).await?;
        if output.success() || is_missing(&output) {
            Ok(())
        } else {
            Err(Error::Iptables {
                message: output.stderr.trim().to_string(),
                stderr: Some(output.stderr),
                exit_code: output.exit_code,
            })
        }
    }

    async fn append_entry(&self, chain: &str, entry: &ChainEntry) -> Result<()> {
        let mut cmd = args(&["-A", chain]);
        cmd.extend(entry.spec());
        self.exec_checked(&cmd).await.map(|_| ())
    }

    async fn delete_entry(&self, chain: &str, entry: &ChainEntry) -> Result<()> {
        let mut cmd = args(&["-D", chain]);
        cmd.extend(entry.spec());
        self.exec_checked(&cmd).await.map(|_| ())
    }

    /// Appends entries in order. If one fails, the entries already appended
    /// by this call are deleted again before the error is returned.
    async fn append_entries(&self, chain: &str, entries: &[ChainEntry]) -> Result<()> {
        for (index, entry) in entries.iter().enumerate() {
            if let Err(e) = self.append_entry(chain, entry).await {
                warn!(
                    "Appending {} to {chain} failed, rolling back {index} entries",
                    entry.address
                );
                for applied in entries[..index].iter().rev() {
                    if let Err(rollback) = self.delete_entry(chain, applied).await {
                        warn!("Rollback of {} in {chain} failed: {rollback}", applied.address);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn delete_entries(&self, chain: &str, entries: &[ChainEntry]) -> Result<()> {
        for entry in entries {
            self.delete_entry(chain, entry).await?;
        }
        Ok(())
    }

    /// Installs a new rule: creates the group chain if needed, hooks it into
    /// OUTPUT and appends one entry per blocked address.
    ///
    /// # Errors
    ///
    /// - `Error::NotRoot` without privileges
    /// - `Error::Validation` for bad names or addresses
    /// - `Error::RuleExists` if the group already has a rule with this name
    /// - `Error::Iptables` if a command fails. Appended entries are rolled
    ///   back, and a chain this call created is removed again.
    pub async fn create_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.ensure_privileged()?;
        let mut rule = rule.clone();
        rule.validate()?;

        let chain = rule.chain();
        let existing = self.list_chain(&chain).await?;
        if existing.as_ref().is_some_and(|listing| {
            rules_from_entries(&rule.group, &listing.entries)
                .iter()
                .any(|r| r.name == rule.name)
        }) {
            return Err(Error::RuleExists {
                group: rule.group,
                name: rule.name,
            });
        }

        let installed = async {
            self.ensure_chain(&chain).await?;
            self.ensure_jump(&chain).await?;
            self.append_entries(&chain, &rule.entries()).await
        }
        .await;

        if let Err(e) = installed {
            // A chain created for this rule alone goes away with it
            if existing.is_none() {
                warn!("Removing {chain} after failed create of '{}'", rule.name);
                if let Err(teardown) = self.remove_chain(&chain).await {
                    warn!("Teardown of {chain} failed: {teardown}");
                }
            }
            return Err(e);
        }

        info!(
            "Created rule '{}' in {chain} ({} addresses, {})",
            rule.name,
            rule.blocked_addresses.len(),
            if rule.enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Replaces an existing rule with new entries. New entries go in before
    /// the old ones are removed, so there is no window without blocking.
    async fn replace_rule(&self, old: &[ChainEntry], new_rule: &FirewallRule) -> Result<()> {
        let chain = new_rule.chain();
        self.append_entries(&chain, &new_rule.entries()).await?;
        self.delete_entries(&chain, old).await
    }

    async fn current_rule(&self, group: &str, name: &str) -> Result<(Vec<ChainEntry>, FirewallRule)> {
        validators::validate_group(group).map_err(|m| Error::validation("group", m))?;
        validators::validate_rule_name(name).map_err(|m| Error::validation("name", m))?;
        let entries = self.rule_entries(group, name).await?;
        let rule = rules_from_entries(group, &entries)
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal(format!("entries for '{name}' did not form a rule")))?;
        Ok((entries, rule))
    }

    /// Replaces the blocked addresses of a rule, keeping its enabled state.
    ///
    /// # Errors
    ///
    /// Returns `Error::RuleNotFound` if the rule doesn't exist, plus the
    /// errors of [`Self::create_rule`].
    pub async fn set_rule_addresses(
        &self,
        group: &str,
        name: &str,
        addresses: &[Ipv4Network],
    ) -> Result<()> {
        self.ensure_privileged()?;
        validators::validate_blocked_addresses(addresses)
            .map_err(|m| Error::validation("blocked_addresses", m))?;
        let (old, rule) = self.current_rule(group, name).await?;

        let updated = rule.with_addresses(addresses.iter().copied());
        self.replace_rule(&old, &updated).await?;

        info!(
            "Updated rule '{name}' in {}: {} addresses",
            chain_name(group),
            addresses.len()
        );
        Ok(())
    }

    /// Enables or disables a rule without losing its addresses.
    ///
    /// # Errors
    ///
    /// Returns `Error::RuleNotFound` if the rule doesn't exist.
    pub async fn set_rule_enabled(&self, group: &str, name: &str, enabled: bool) -> Result<()> {
        self.ensure_privileged()?;
        let (old, rule) = self.current_rule(group, name).await?;

        if old.iter().all(|e| e.is_drop() == enabled) {
            debug!("Rule '{name}' already {}", if enabled { "enabled" } else { "disabled" });
            return Ok(());
        }

        let updated = rule.with_enabled(enabled);
        self.replace_rule(&old, &updated).await?;

        info!(
            "{} rule '{name}' in {}",
            if enabled { "Enabled" } else { "Disabled" },
            chain_name(group)
        );
        Ok(())
    }

    /// Deletes a rule. The group chain goes away with its last rule.
    ///
    /// # Errors
    ///
    /// Returns `Error::RuleNotFound` if the rule doesn't exist.
    pub async fn delete_rule(&self, group: &str, name: &str) -> Result<()> {
        self.ensure_privileged()?;
        let (old, _) = self.current_rule(group, name).await?;
        let chain = chain_name(group);

        self.delete_entries(&chain, &old).await?;
        info!("Deleted rule '{name}' from {chain}");

        if self
            .list_chain(&chain)
            .await?
            .is_none_or(|listing| listing.is_empty())
        {
            self.remove_chain(&chain).await?;
        }
        Ok(())
    }

    /// Whether the group chain is hooked into OUTPUT.
    ///
    /// # Errors
    ///
    /// Returns `Err` only if iptables cannot be run.
    pub async fn is_group_enabled(&self, group: &str) -> Result<bool> {
        validators::validate_group(group).map_err(|m| Error::validation("group", m))?;
        let output = self
            .exec(&args(&["-C", OUTPUT_CHAIN, "-j", &chain_name(group)]))
            .await?;
        Ok(output.success())
    }

    /// Hooks or unhooks a whole group from OUTPUT.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the group chain doesn't exist when enabling.
    pub async fn set_group_enabled(&self, group: &str, enabled: bool) -> Result<()> {
        self.ensure_privileged()?;
        validators::validate_group(group).map_err(|m| Error::validation("group", m))?;
        let chain = chain_name(group);

        if enabled {
            self.ensure_jump(&chain).await?;
        } else {
            self.exec_tolerant(&["-D", OUTPUT_CHAIN, "-j", &chain]).await?;
        }

        info!(
            "{} group {chain}",
            if enabled { "Enabled" } else { "Disabled" }
        );
        Ok(())
    }

    /// Removes a group and every rule in it.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a teardown step fails for a reason other than the
    /// chain already being gone.
    pub async fn delete_group(&self, group: &str) -> Result<()> {
        self.ensure_privileged()?;
        validators::validate_group(group).map_err(|m| Error::validation("group", m))?;
        let chain = chain_name(group);
        self.remove_chain(&chain).await?;
        info!("Deleted group {chain}");
        Ok(())
    }

    async fn remove_chain(&self, chain: &str) -> Result<()> {
        self.exec_tolerant(&["-D", OUTPUT_CHAIN, "-j", chain]).await?;
        self.exec_tolerant(&["-F", chain]).await?;
        self.exec_tolerant(&["-X", chain]).await
    }
}
