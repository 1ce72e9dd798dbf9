//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::iptables::Firewall;
use crate::core::rule::{FirewallRule, OUTPUT_CHAIN};
use crate::core::runner::{CommandOutput, CommandRunner};
use ipnetwork::Ipv4Network;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("DROPSHIP_TEST_NO_ELEVATION", "1");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("DROPSHIP_TEST_NO_ELEVATION");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

const NO_CHAIN: &str = "iptables: No chain/target/match by that name.";
const BAD_RULE: &str = "iptables: Bad rule (does a matching rule exist in that chain?).";
const BUILTIN_TARGETS: [&str; 4] = ["ACCEPT", "DROP", "REJECT", "RETURN"];

/// In-memory stand-in for the `iptables` binary.
///
/// Models the filter table closely enough for the commands Dropship issues
/// (`-N -X -F -A -D -C -S -L`) and records every invocation. Specific
/// command lines can be forced to fail with [`FakeIptables::fail_when`].
pub struct FakeIptables {
    chains: Mutex<BTreeMap<String, Vec<Vec<String>>>>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, CommandOutput)>>,
    installed: bool,
}

impl Default for FakeIptables {
    fn default() -> Self {
        let mut chains = BTreeMap::new();
        chains.insert(OUTPUT_CHAIN.to_string(), Vec::new());
        Self {
            chains: Mutex::new(chains),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            installed: true,
        }
    }
}

impl FakeIptables {
    /// A system where `which iptables` finds nothing.
    pub fn not_installed() -> Self {
        Self {
            installed: false,
            ..Self::default()
        }
    }

    /// Every command line issued so far, program included.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines issued after the first `skip` calls.
    pub fn calls_since(&self, skip: usize) -> Vec<String> {
        self.calls().into_iter().skip(skip).collect()
    }

    /// Rules in a chain, as `iptables -S` would print them (minus `-A <chain>`).
    pub fn rules(&self, chain: &str) -> Vec<String> {
        self.chains
            .lock()
            .unwrap()
            .get(chain)
            .map(|rules| rules.iter().map(|r| r.join(" ")).collect())
            .unwrap_or_default()
    }

    pub fn has_chain(&self, chain: &str) -> bool {
        self.chains.lock().unwrap().contains_key(chain)
    }

    /// Makes any command line starting with `prefix` (without the program
    /// name) fail with the given stderr.
    pub fn fail_when(&self, prefix: &str, stderr: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((prefix.to_string(), CommandOutput::failed(1, stderr)));
    }

    /// Adds a rule line directly, bypassing command handling.
    pub fn seed(&self, chain: &str, spec: &[&str]) {
        self.chains
            .lock()
            .unwrap()
            .entry(chain.to_string())
            .or_default()
            .push(spec.iter().map(|s| (*s).to_string()).collect());
    }

    fn handle(&self, args: &[String]) -> CommandOutput {
        let joined = args.join(" ");
        if let Some((_, output)) = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| joined.starts_with(prefix.as_str()))
        {
            return output.clone();
        }

        let mut chains = self.chains.lock().unwrap();
        let op = args.first().map_or("", String::as_str);
        let chain = args.get(1).cloned().unwrap_or_default();
        let spec: Vec<String> = args.iter().skip(2).cloned().collect();

        match op {
            "-L" => CommandOutput::ok("Chain OUTPUT (policy ACCEPT)\ntarget     prot opt source               destination\n"),
            "-S" => match chains.get(&chain) {
                Some(rules) => {
                    let header = if chain == OUTPUT_CHAIN {
                        format!("-P {chain} ACCEPT")
                    } else {
                        format!("-N {chain}")
                    };
                    let mut out = vec![header];
                    for rule in rules {
                        let quoted: Vec<String> = rule
                            .iter()
                            .map(|t| if t.contains(' ') { format!("\"{t}\"") } else { t.clone() })
                            .collect();
                        out.push(format!("-A {chain} {}", quoted.join(" ")));
                    }
                    CommandOutput::ok(out.join("\n") + "\n")
                }
                None => CommandOutput::failed(1, NO_CHAIN),
            },
            "-N" => {
                if chains.contains_key(&chain) {
                    CommandOutput::failed(1, "iptables: Chain already exists.")
                } else {
                    chains.insert(chain, Vec::new());
                    CommandOutput::ok("")
                }
            }
            "-X" => {
                let referenced = chains
                    .values()
                    .flatten()
                    .any(|rule| rule.windows(2).any(|w| w[0] == "-j" && w[1] == chain));
                match chains.get(&chain).map(Vec::is_empty) {
                    None => CommandOutput::failed(1, NO_CHAIN),
                    Some(false) => CommandOutput::failed(1, "iptables: Directory not empty."),
                    Some(true) if referenced => {
                        CommandOutput::failed(1, "iptables: Too many links.")
                    }
                    Some(true) => {
                        chains.remove(&chain);
                        CommandOutput::ok("")
                    }
                }
            }
            "-F" => match chains.get_mut(&chain) {
                Some(rules) => {
                    rules.clear();
                    CommandOutput::ok("")
                }
                None => CommandOutput::failed(1, NO_CHAIN),
            },
            "-A" => {
                let jump = spec.windows(2).find(|w| w[0] == "-j").map(|w| w[1].clone());
                if let Some(target) = jump
                    && !BUILTIN_TARGETS.contains(&target.as_str())
                    && !chains.contains_key(&target)
                {
                    return CommandOutput::failed(
                        2,
                        format!("iptables v1.8.9 (nf_tables): Chain '{target}' does not exist"),
                    );
                }
                match chains.get_mut(&chain) {
                    Some(rules) => {
                        rules.push(spec);
                        CommandOutput::ok("")
                    }
                    None => CommandOutput::failed(1, NO_CHAIN),
                }
            }
            "-D" => match chains.get_mut(&chain) {
                Some(rules) => match rules.iter().position(|r| *r == spec) {
                    Some(index) => {
                        rules.remove(index);
                        CommandOutput::ok("")
                    }
                    None => CommandOutput::failed(1, BAD_RULE),
                },
                None => CommandOutput::failed(1, NO_CHAIN),
            },
            "-C" => match chains.get(&chain) {
                Some(rules) if rules.contains(&spec) => CommandOutput::ok(""),
                Some(_) => CommandOutput::failed(1, BAD_RULE),
                None => CommandOutput::failed(1, NO_CHAIN),
            },
            _ => CommandOutput::failed(2, format!("iptables: unknown option {op}")),
        }
    }
}

impl CommandRunner for FakeIptables {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{program} {}", args.join(" ")).trim_end().to_string());

        if program == "which" {
            return Ok(if self.installed {
                CommandOutput::ok("/usr/sbin/iptables\n")
            } else {
                CommandOutput::failed(1, "")
            });
        }
        if !self.installed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such file or directory",
            ));
        }
        Ok(self.handle(args))
    }
}

/// A privileged firewall over a fresh fake.
pub fn fake_firewall() -> Firewall<FakeIptables> {
    Firewall::with_runner(FakeIptables::default(), true)
}

pub fn net(s: &str) -> Ipv4Network {
    s.parse().unwrap()
}

/// Creates a test rule with customizable group, name and addresses.
pub fn create_test_rule(group: &str, name: &str, addresses: &[&str]) -> FirewallRule {
    FirewallRule::new(group, name).with_addresses(addresses.iter().map(|a| net(a)))
}
