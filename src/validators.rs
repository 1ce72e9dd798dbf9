//! Input validation and sanitization functions for Dropship
//!
//! Every value that ends up in an iptables argument list passes through here
//! first. Commands are spawned without a shell, so validation is about keeping
//! chain names within kernel limits and keeping comments parseable.

use crate::core::rule::{CHAIN_PREFIX, MAX_CHAIN_NAME_LEN};
use ipnetwork::{IpNetwork, Ipv4Network};

/// Longest group name that still fits `DROPSHIP_<group>` into a chain name.
pub const MAX_GROUP_LEN: usize = MAX_CHAIN_NAME_LEN - CHAIN_PREFIX.len();

pub const MAX_NAME_LEN: usize = 64;

pub const MAX_DESCRIPTION_LEN: usize = 128;

/// Sanitizes a description for safe use in an iptables comment.
///
/// Keeps ASCII alphanumerics and a small set of punctuation, collapses the
/// result to at most 128 characters and trims surrounding whitespace.
///
/// # Examples
///
/// ```
/// use dropship::validators::sanitize_description;
///
/// assert_eq!(sanitize_description("Valve servers (EU)"), "Valve servers (EU)");
/// assert_eq!(sanitize_description("Quote\"d\nline"), "Quotedline");
/// ```
pub fn sanitize_description(input: &str) -> String {
    let sanitized: String = input
        .chars()
        .filter(|c| {
            // SECURITY: ASCII-only keeps the comment within one iptables token
            c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | ',' | '(' | ')' | '/')
        })
        .take(MAX_DESCRIPTION_LEN)
        .collect();
    sanitized.trim().to_string()
}

/// Validates a group name.
///
/// # Errors
///
/// Returns `Err` if the name is empty, too long for a chain name, or contains
/// characters other than ASCII alphanumerics, `_` and `-`.
pub fn validate_group(input: &str) -> Result<String, String> {
    if input.is_empty() {
        return Err("Group name cannot be empty".to_string());
    }

    if input.len() > MAX_GROUP_LEN {
        return Err(format!(
            "Group name too long (max {MAX_GROUP_LEN} characters)"
        ));
    }

    if !input
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
    {
        return Err("Group name contains invalid characters".to_string());
    }

    Ok(input.to_string())
}

/// Validates a rule name.
///
/// # Errors
///
/// Returns `Err` if the name is empty, longer than 64 characters, or contains
/// characters other than ASCII alphanumerics, `_`, `-` and `.`.
pub fn validate_rule_name(input: &str) -> Result<String, String> {
    if input.is_empty() {
        return Err("Rule name cannot be empty".to_string());
    }

    if input.len() > MAX_NAME_LEN {
        return Err(format!("Rule name too long (max {MAX_NAME_LEN} characters)"));
    }

    if !input
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err("Rule name contains invalid characters".to_string());
    }

    Ok(input.to_string())
}

/// Parses a blocked address into a normalized IPv4 network.
///
/// A bare address is treated as `/32`. Host bits are cleared, so
/// `10.1.2.3/8` becomes `10.0.0.0/8`, matching what `iptables -S` prints.
///
/// # Errors
///
/// Returns `Err` for malformed input and for IPv6 networks, which iptables
/// cannot filter.
pub fn parse_blocked_address(input: &str) -> Result<Ipv4Network, String> {
    let trimmed = input.trim();
    match trimmed.parse::<IpNetwork>() {
        Ok(IpNetwork::V4(net)) => Ipv4Network::new(net.network(), net.prefix())
            .map_err(|e| format!("Invalid address '{trimmed}': {e}")),
        Ok(IpNetwork::V6(_)) => Err(format!(
            "IPv6 address '{trimmed}' is not supported by iptables"
        )),
        Err(e) => Err(format!("Invalid address '{trimmed}': {e}")),
    }
}

/// Validates a list of blocked addresses.
///
/// # Errors
///
/// Returns `Err` if the list is empty.
pub fn validate_blocked_addresses(addresses: &[Ipv4Network]) -> Result<(), String> {
    if addresses.is_empty() {
        return Err("A rule must block at least one address".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_group_length_fits_chain_name() {
        let longest = "a".repeat(MAX_GROUP_LEN);
        assert!(validate_group(&longest).is_ok());
        assert!(validate_group(&format!("{longest}a")).is_err());
        assert_eq!(CHAIN_PREFIX.len() + MAX_GROUP_LEN, 28);
    }

    #[test]
    fn test_group_rejects_spaces_and_empty() {
        assert!(validate_group("").is_err());
        assert!(validate_group("my group").is_err());
        assert!(validate_group("games-eu_1").is_ok());
    }

    #[test]
    fn test_rule_name_charset() {
        assert!(validate_rule_name("steam.eu-west_1").is_ok());
        assert!(validate_rule_name("").is_err());
        assert!(validate_rule_name("a:b").is_err());
        assert!(validate_rule_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_parse_bare_address_is_host_route() {
        let net = parse_blocked_address("203.0.113.7").unwrap();
        assert_eq!(net.to_string(), "203.0.113.7/32");
    }

    #[test]
    fn test_parse_clears_host_bits() {
        let net = parse_blocked_address(" 10.1.2.3/8 ").unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_parse_rejects_ipv6_and_garbage() {
        assert!(
            parse_blocked_address("2001:db8::/32")
                .unwrap_err()
                .contains("IPv6")
        );
        assert!(parse_blocked_address("10.0.0.0/33").is_err());
        assert!(parse_blocked_address("example.com").is_err());
    }

    #[test]
    fn test_empty_address_list_rejected() {
        assert!(validate_blocked_addresses(&[]).is_err());
    }

    #[test]
    fn test_sanitize_description_strips_quotes_and_truncates() {
        assert_eq!(sanitize_description("  padded  "), "padded");
        assert_eq!(sanitize_description(&"d".repeat(300)).len(), MAX_DESCRIPTION_LEN);
        assert!(!sanitize_description("say \"hi\"").contains('"'));
    }

    proptest! {
        #[test]
        fn prop_sanitized_description_is_safe(input in ".*") {
            let out = sanitize_description(&input);
            prop_assert!(out.len() <= MAX_DESCRIPTION_LEN);
            prop_assert!(!out.contains('"'));
            prop_assert!(!out.contains(':'));
            prop_assert!(out.is_ascii());
        }

        #[test]
        fn prop_valid_groups_fit_chain_limit(group in "[A-Za-z0-9_-]{1,40}") {
            if let Ok(g) = validate_group(&group) {
                prop_assert!(CHAIN_PREFIX.len() + g.len() <= MAX_CHAIN_NAME_LEN);
            } else {
                prop_assert!(group.len() > MAX_GROUP_LEN);
            }
        }

        #[test]
        fn prop_ipv4_networks_are_normalized(a: u8, b: u8, c: u8, d: u8, prefix in 0u8..=32) {
            let net = parse_blocked_address(&format!("{a}.{b}.{c}.{d}/{prefix}")).unwrap();
            prop_assert_eq!(net.prefix(), prefix);
            prop_assert_eq!(net.ip(), net.network());
        }
    }
}
