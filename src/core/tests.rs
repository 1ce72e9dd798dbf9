use crate::core::error::Error;
use crate::core::iptables::Firewall;
use crate::core::test_helpers::{FakeIptables, create_test_rule, fake_firewall, net};

#[tokio::test]
async fn test_initialize_uses_which() {
    let fw = fake_firewall();
    fw.initialize().await.unwrap();
    assert_eq!(fw.runner().calls(), ["which iptables"]);
}

#[tokio::test]
async fn test_initialize_reports_missing_iptables() {
    let fw = Firewall::with_runner(FakeIptables::not_installed(), true);
    assert!(matches!(
        fw.initialize().await,
        Err(Error::IptablesUnavailable)
    ));
    assert!(!fw.is_firewall_enabled().await);
}

#[tokio::test]
async fn test_is_firewall_enabled_lists_rules() {
    let fw = fake_firewall();
    assert!(fw.is_firewall_enabled().await);
    assert_eq!(fw.runner().calls(), ["iptables -L -n"]);
}

#[tokio::test]
async fn test_create_rule_command_sequence() {
    let fw = fake_firewall();
    let rule = create_test_rule("games", "steam", &["155.133.224.0/19", "162.254.192.0/21"])
        .with_description("Valve EU");

    fw.create_rule(&rule).await.unwrap();

    assert_eq!(
        fw.runner().calls(),
        [
            "iptables -S DROPSHIP_games",
            "iptables -N DROPSHIP_games",
            "iptables -C OUTPUT -j DROPSHIP_games",
            "iptables -A OUTPUT -j DROPSHIP_games",
            "iptables -A DROPSHIP_games -d 155.133.224.0/19 -m comment --comment steam: Valve EU -j DROP",
            "iptables -A DROPSHIP_games -d 162.254.192.0/21 -m comment --comment steam: Valve EU -j DROP",
        ]
    );
    assert_eq!(fw.runner().rules("OUTPUT"), ["-j DROPSHIP_games"]);
}

#[tokio::test]
async fn test_second_rule_reuses_chain_and_jump() {
    let fw = fake_firewall();
    fw.create_rule(&create_test_rule("games", "steam", &["10.0.0.0/8"]))
        .await
        .unwrap();
    let before = fw.runner().calls().len();

    fw.create_rule(&create_test_rule("games", "blizzard", &["11.0.0.0/8"]))
        .await
        .unwrap();

    assert_eq!(
        fw.runner().calls_since(before),
        [
            "iptables -S DROPSHIP_games",
            "iptables -N DROPSHIP_games",
            "iptables -C OUTPUT -j DROPSHIP_games",
            "iptables -A DROPSHIP_games -d 11.0.0.0/8 -m comment --comment blizzard -j DROP",
        ]
    );
    // Exactly one jump, no matter how many rules share the group
    assert_eq!(fw.runner().rules("OUTPUT").len(), 1);
}

#[tokio::test]
async fn test_create_then_list_round_trips() {
    let fw = fake_firewall();
    let rule = create_test_rule("games", "steam", &["10.0.0.0/8", "203.0.113.7"])
        .with_description("Valve EU");
    fw.create_rule(&rule).await.unwrap();
    fw.create_rule(&create_test_rule("games", "riot", &["11.0.0.0/8"]).with_enabled(false))
        .await
        .unwrap();

    let rules = fw.get_rules_in_group("games").await.unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0], rule);
    assert_eq!(rules[0].blocked_addresses[1].to_string(), "203.0.113.7/32");
    assert_eq!(rules[1].name, "riot");
    assert!(!rules[1].enabled);
}

#[tokio::test]
async fn test_for_each_rule_visits_every_rule() {
    let fw = fake_firewall();
    for name in ["a", "b", "c"] {
        fw.create_rule(&create_test_rule("games", name, &["10.0.0.0/8"]))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    fw.for_each_rule_in_group("games", |rule| seen.push(rule.name.clone()))
        .await
        .unwrap();
    assert_eq!(seen, ["a", "b", "c"]);
}

#[tokio::test]
async fn test_missing_group_has_no_rules() {
    let fw = fake_firewall();
    assert!(fw.get_rules_in_group("nothing").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_listing_ignores_foreign_entries() {
    let fw = fake_firewall();
    fw.runner().seed("DROPSHIP_games", &["-p", "tcp", "--dport", "80", "-j", "DROP"]);
    fw.runner().seed("DROPSHIP_games", &["-d", "10.0.0.0/8", "-j", "DROP"]);
    assert!(fw.get_rules_in_group("games").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_listing_error_is_propagated() {
    let fw = fake_firewall();
    fw.runner().fail_when(
        "-S",
        "iptables v1.8.9 (nf_tables): Could not fetch rule set generation id: Permission denied (you must be root)",
    );
    let err = fw.get_rules_in_group("games").await.unwrap_err();
    assert!(matches!(err, Error::Iptables { .. }));
    assert!(err.translate().user_message.contains("permissions"));
}

#[tokio::test]
async fn test_mutations_require_root() {
    let fw = Firewall::with_runner(FakeIptables::default(), false);
    let rule = create_test_rule("games", "steam", &["10.0.0.0/8"]);

    assert!(matches!(fw.create_rule(&rule).await, Err(Error::NotRoot)));
    assert!(matches!(
        fw.set_rule_addresses("games", "steam", &[net("1.0.0.0/8")]).await,
        Err(Error::NotRoot)
    ));
    assert!(matches!(
        fw.set_rule_enabled("games", "steam", false).await,
        Err(Error::NotRoot)
    ));
    assert!(matches!(fw.delete_rule("games", "steam").await, Err(Error::NotRoot)));
    assert!(matches!(
        fw.set_group_enabled("games", false).await,
        Err(Error::NotRoot)
    ));
    assert!(matches!(fw.delete_group("games").await, Err(Error::NotRoot)));
    assert!(fw.runner().calls().is_empty());
}

#[tokio::test]
async fn test_create_rejects_duplicates_and_bad_input() {
    let fw = fake_firewall();
    let rule = create_test_rule("games", "steam", &["10.0.0.0/8"]);
    fw.create_rule(&rule).await.unwrap();

    assert!(matches!(
        fw.create_rule(&rule).await,
        Err(Error::RuleExists { .. })
    ));
    assert!(matches!(
        fw.create_rule(&create_test_rule("games", "empty", &[])).await,
        Err(Error::Validation { .. })
    ));
    assert!(matches!(
        fw.create_rule(&create_test_rule("this-group-name-is-too-long", "x", &["1.0.0.0/8"]))
            .await,
        Err(Error::Validation { .. })
    ));
}

#[tokio::test]
async fn test_create_rolls_back_on_partial_failure() {
    let fw = fake_firewall();
    fw.runner()
        .fail_when("-A DROPSHIP_games -d 12.0.0.0/8", "iptables: Resource temporarily unavailable.");

    let rule = create_test_rule("games", "steam", &["10.0.0.0/8", "11.0.0.0/8", "12.0.0.0/8"]);
    let err = fw.create_rule(&rule).await.unwrap_err();

    assert!(matches!(err, Error::Iptables { exit_code: Some(1), .. }));
    let calls = fw.runner().calls();
    assert_eq!(
        calls[calls.len() - 5..],
        [
            "iptables -D DROPSHIP_games -d 11.0.0.0/8 -m comment --comment steam -j DROP",
            "iptables -D DROPSHIP_games -d 10.0.0.0/8 -m comment --comment steam -j DROP",
            "iptables -D OUTPUT -j DROPSHIP_games",
            "iptables -F DROPSHIP_games",
            "iptables -X DROPSHIP_games",
        ]
    );
    // The group did not exist before, so nothing of it is left
    assert!(!fw.runner().has_chain("DROPSHIP_games"));
    assert!(fw.runner().rules("OUTPUT").is_empty());
}

#[tokio::test]
async fn test_failed_first_append_removes_new_chain() {
    let fw = fake_firewall();
    fw.runner()
        .fail_when("-A DROPSHIP_games -d 10.0.0.0/8", "iptables: Resource temporarily unavailable.");

    let result = fw
        .create_rule(&create_test_rule("games", "steam", &["10.0.0.0/8"]))
        .await;

    assert!(result.is_err());
    assert!(!fw.runner().has_chain("DROPSHIP_games"));
    assert!(fw.runner().rules("OUTPUT").is_empty());
}

#[tokio::test]
async fn test_failed_create_keeps_existing_group() {
    let fw = fake_firewall();
    fw.create_rule(&create_test_rule("games", "steam", &["10.0.0.0/8"]))
        .await
        .unwrap();
    fw.runner()
        .fail_when("-A DROPSHIP_games -d 11.0.0.0/8", "iptables: Resource temporarily unavailable.");

    let result = fw
        .create_rule(&create_test_rule("games", "blizzard", &["11.0.0.0/8"]))
        .await;

    assert!(result.is_err());
    assert!(fw.runner().has_chain("DROPSHIP_games"));
    assert_eq!(fw.runner().rules("OUTPUT"), ["-j DROPSHIP_games"]);
    let rules = fw.get_rules_in_group("games").await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].name, "steam");
}

#[tokio::test]
async fn test_set_rule_addresses_appends_before_deleting() {
    let fw = fake_firewall();
    fw.create_rule(&create_test_rule("games", "steam", &["10.0.0.0/8"]))
        .await
        .unwrap();
    let before = fw.runner().calls().len();

    fw.set_rule_addresses("games", "steam", &[net("11.0.0.0/8"), net("12.0.0.0/8")])
        .await
        .unwrap();

    assert_eq!(
        fw.runner().calls_since(before),
        [
            "iptables -S DROPSHIP_games",
            "iptables -A DROPSHIP_games -d 11.0.0.0/8 -m comment --comment steam -j DROP",
            "iptables -A DROPSHIP_games -d 12.0.0.0/8 -m comment --comment steam -j DROP",
            "iptables -D DROPSHIP_games -d 10.0.0.0/8 -m comment --comment steam -j DROP",
        ]
    );
    let rules = fw.get_rules_in_group("games").await.unwrap();
    assert_eq!(
        rules[0].blocked_addresses,
        [net("11.0.0.0/8"), net("12.0.0.0/8")]
    );
}

#[tokio::test]
async fn test_set_rule_addresses_keeps_disabled_state_and_other_rules() {
    let fw = fake_firewall();
    fw.create_rule(&create_test_rule("games", "steam", &["10.0.0.0/8"]).with_enabled(false))
        .await
        .unwrap();
    fw.create_rule(&create_test_rule("games", "riot", &["10.0.0.0/8"]))
        .await
        .unwrap();

    fw.set_rule_addresses("games", "steam", &[net("10.0.0.0/8"), net("13.0.0.0/8")])
        .await
        .unwrap();

    let rules = fw.get_rules_in_group("games").await.unwrap();
    let steam = rules.iter().find(|r| r.name == "steam").unwrap();
    let riot = rules.iter().find(|r| r.name == "riot").unwrap();
    assert!(!steam.enabled);
    assert_eq!(steam.blocked_addresses.len(), 2);
    assert!(riot.enabled);
    assert_eq!(riot.blocked_addresses, [net("10.0.0.0/8")]);
}

#[tokio::test]
async fn test_set_rule_addresses_unknown_rule() {
    let fw = fake_firewall();
    assert!(matches!(
        fw.set_rule_addresses("games", "ghost", &[net("10.0.0.0/8")]).await,
        Err(Error::RuleNotFound { .. })
    ));
    assert!(matches!(
        fw.set_rule_addresses("games", "ghost", &[]).await,
        Err(Error::Validation { .. })
    ));
}

#[tokio::test]
async fn test_disable_and_enable_rule() {
    let fw = fake_firewall();
    fw.create_rule(&create_test_rule("games", "steam", &["10.0.0.0/8"]))
        .await
        .unwrap();

    fw.set_rule_enabled("games", "steam", false).await.unwrap();
    assert_eq!(
        fw.runner().rules("DROPSHIP_games"),
        ["-d 10.0.0.0/8 -m comment --comment steam"]
    );
    assert!(!fw.get_rules_in_group("games").await.unwrap()[0].enabled);

    fw.set_rule_enabled("games", "steam", true).await.unwrap();
    assert_eq!(
        fw.runner().rules("DROPSHIP_games"),
        ["-d 10.0.0.0/8 -m comment --comment steam -j DROP"]
    );
}

#[tokio::test]
async fn test_enable_already_enabled_rule_is_noop() {
    let fw = fake_firewall();
    fw.create_rule(&create_test_rule("games", "steam", &["10.0.0.0/8"]))
        .await
        .unwrap();
    let before = fw.runner().calls().len();

    fw.set_rule_enabled("games", "steam", true).await.unwrap();
    assert_eq!(fw.runner().calls_since(before), ["iptables -S DROPSHIP_games"]);
}

#[tokio::test]
async fn test_delete_rule_keeps_chain_while_rules_remain() {
    let fw = fake_firewall();
    fw.create_rule(&create_test_rule("games", "steam", &["10.0.0.0/8"]))
        .await
        .unwrap();
    fw.create_rule(&create_test_rule("games", "riot", &["11.0.0.0/8"]))
        .await
        .unwrap();

    fw.delete_rule("games", "steam").await.unwrap();

    assert!(fw.runner().has_chain("DROPSHIP_games"));
    let rules = fw.get_rules_in_group("games").await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].name, "riot");
}

#[tokio::test]
async fn test_delete_last_rule_removes_chain() {
    let fw = fake_firewall();
    fw.create_rule(&create_test_rule("games", "steam", &["10.0.0.0/8"]))
        .await
        .unwrap();
    let before = fw.runner().calls().len();

    fw.delete_rule("games", "steam").await.unwrap();

    assert_eq!(
        fw.runner().calls_since(before),
        [
            "iptables -S DROPSHIP_games",
            "iptables -D DROPSHIP_games -d 10.0.0.0/8 -m comment --comment steam -j DROP",
            "iptables -S DROPSHIP_games",
            "iptables -D OUTPUT -j DROPSHIP_games",
            "iptables -F DROPSHIP_games",
            "iptables -X DROPSHIP_games",
        ]
    );
    assert!(!fw.runner().has_chain("DROPSHIP_games"));
    assert!(fw.runner().rules("OUTPUT").is_empty());
}

#[tokio::test]
async fn test_delete_unknown_rule() {
    let fw = fake_firewall();
    assert!(matches!(
        fw.delete_rule("games", "ghost").await,
        Err(Error::RuleNotFound { .. })
    ));
}

#[tokio::test]
async fn test_group_toggle() {
    let fw = fake_firewall();
    fw.create_rule(&create_test_rule("games", "steam", &["10.0.0.0/8"]))
        .await
        .unwrap();
    assert!(fw.is_group_enabled("games").await.unwrap());

    fw.set_group_enabled("games", false).await.unwrap();
    assert!(!fw.is_group_enabled("games").await.unwrap());
    // Disabling twice is fine
    fw.set_group_enabled("games", false).await.unwrap();

    fw.set_group_enabled("games", true).await.unwrap();
    assert!(fw.is_group_enabled("games").await.unwrap());
    assert_eq!(fw.runner().rules("OUTPUT"), ["-j DROPSHIP_games"]);
}

#[tokio::test]
async fn test_enable_group_without_chain_fails() {
    let fw = fake_firewall();
    let err = fw.set_group_enabled("nothing", true).await.unwrap_err();
    assert!(matches!(err, Error::Iptables { .. }));
}

#[tokio::test]
async fn test_delete_group_removes_everything_and_is_idempotent() {
    let fw = fake_firewall();
    fw.create_rule(&create_test_rule("games", "steam", &["10.0.0.0/8", "11.0.0.0/8"]))
        .await
        .unwrap();

    fw.delete_group("games").await.unwrap();
    assert!(!fw.runner().has_chain("DROPSHIP_games"));
    assert!(fw.runner().rules("OUTPUT").is_empty());

    fw.delete_group("games").await.unwrap();
}

#[tokio::test]
async fn test_default_program_name_is_iptables() {
    let fw = fake_firewall();
    assert_eq!(fw.program(), "iptables");
    fw.is_firewall_enabled().await;
    assert!(fw.runner().calls()[0].starts_with("iptables "));
}
