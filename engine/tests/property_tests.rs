use luna_engine::agent::{validate_step, AgentState};
use luna_engine::config::Config;
use luna_engine::risk_engine::RiskEngine;
use proptest::prelude::*;
use sdk::{RiskLevel, TaskResult};
use serde_json::json;

fn tier(level: RiskLevel) -> u8 {
    match level {
        RiskLevel::Low => 0,
        RiskLevel::Medium => 1,
        RiskLevel::High => 2,
        RiskLevel::Dangerous => 3,
    }
}

proptest! {
    // Same input, same report
    #[test]
    fn test_assessment_is_deterministic(command in ".{0,80}") {
        let engine = RiskEngine::with_defaults().unwrap();
        let params = json!({"command": command});
        let first = engine.assess("command", &params);
        let second = engine.assess("command", &params);
        prop_assert_eq!(first.label, second.label);
        prop_assert_eq!(first.score, second.score);
        prop_assert_eq!(first.matched_rules, second.matched_rules);
    }

    // Adding text to a command never lowers its tier
    #[test]
    fn test_appending_never_lowers_tier(prefix in "[a-z ]{0,20}", suffix in "[a-z ]{0,20}") {
        let engine = RiskEngine::with_defaults().unwrap();
        let base = engine.assess("command", &json!({"command": "sudo rm -rf /tmp/x"}));
        let extended = engine.assess(
            "command",
            &json!({"command": format!("{} ; sudo rm -rf /tmp/x ; {}", prefix, suffix)}),
        );
        prop_assert!(tier(extended.label) >= tier(base.label));
    }

    // Policy follows the label alone
    #[test]
    fn test_policy_consistent_with_label(command in "(sudo |rm -rf |git push |mkfs\\.ext4 |ls |echo ){1,3}[a-z/]{0,10}") {
        let engine = RiskEngine::with_defaults().unwrap();
        let report = engine.assess("command", &json!({"command": command}));
        match report.label {
            RiskLevel::Dangerous => prop_assert!(report.blocked),
            RiskLevel::High => prop_assert!(report.requires_confirmation && !report.blocked),
            RiskLevel::Medium | RiskLevel::Low => prop_assert!(report.is_auto()),
        }
    }

    // Confidence is always clamped and failures are never verified
    #[test]
    fn test_task_result_invariants(confidence in proptest::num::f64::ANY, verified in any::<bool>()) {
        let ok = TaskResult::success("out", confidence, verified, None);
        prop_assert!((0.0..=1.0).contains(&ok.confidence()));
        prop_assert_eq!(ok.is_success(), verified);

        let failed = TaskResult::failure("boom");
        prop_assert!(!failed.verified());
        prop_assert_eq!(failed.confidence(), 0.0);
    }

    // The step cursor never runs past the plan
    #[test]
    fn test_cursor_stays_in_bounds(len in 0usize..6, advances in 0usize..12) {
        let mut state = AgentState::new("goal");
        state.replace_plan(vec![json!({"action": "system_info", "parameters": {}}); len]);
        for _ in 0..advances {
            state.advance();
        }
        prop_assert!(state.current_step_index() <= len);
        prop_assert_eq!(state.current_step().is_some(), state.current_step_index() < len);
    }

    // Arbitrary JSON never panics the step validator
    #[test]
    fn test_validate_step_total(action in "[a-z_]{0,12}", key in "[a-z]{1,8}", value in ".{0,20}") {
        let mut parameters = serde_json::Map::new();
        parameters.insert(key, json!(value));
        let raw = json!({"action": action, "parameters": parameters});
        let _ = validate_step(&raw);
    }

    #[test]
    fn test_config_agent_round_trip(
        log_level in "error|warn|info|debug|trace",
        max_iterations in 1u32..100,
        stagnation in 1u32..10,
        medium_confirm in any::<bool>(),
    ) {
        let mut config = Config::default();
        config.core.log_level = log_level.clone();
        config.agent.max_iterations = max_iterations;
        config.agent.stagnation_threshold = stagnation;
        config.risk.medium_requires_confirmation = medium_confirm;

        let text = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        prop_assert_eq!(parsed.core.log_level, log_level);
        prop_assert_eq!(parsed.agent.max_iterations, max_iterations);
        prop_assert_eq!(parsed.agent.stagnation_threshold, stagnation);
        prop_assert_eq!(parsed.risk.medium_requires_confirmation, medium_confirm);
        prop_assert_eq!(parsed.risk.rules, config.risk.rules);
    }
}
