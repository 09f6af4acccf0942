//! Risk engine
//!
//! Classifies a proposed `(action, parameters)` pair into a risk tier and an
//! autonomy decision. Classification is a pure function of its inputs and the
//! configured policy: no I/O, no clock, no randomness.
//!
//! # Scoring
//!
//! Detector rules are matched against a canonical text form of the action:
//! the canonical action name followed by `key=value` pairs in sorted key order.
//! File paths are lexically normalized first, so `/tmp/../etc` is scored as
//! `/etc`. Every matching rule adds its weight exactly once. The cumulative score maps
//! to a tier through the configured thresholds:
//!
//! - **low**: auto-execute
//! - **medium**: auto-execute unless `medium_requires_confirmation`
//! - **high**: requires confirmation
//! - **dangerous**: blocked, unless the exact signature is whitelisted, in
//!   which case it requires confirmation
//!
//! # Examples
//!
//! ```
//! use luna_engine::risk_engine::RiskEngine;
//! use sdk::RiskLevel;
//! use serde_json::json;
//!
//! let engine = RiskEngine::with_defaults().unwrap();
//!
//! let report = engine.assess("system_info", &json!({}));
//! assert_eq!(report.label, RiskLevel::Low);
//! assert!(!report.blocked);
//!
//! let report = engine.assess("command", &json!({"command": "rm -rf /"}));
//! assert_eq!(report.label, RiskLevel::Dangerous);
//! assert!(report.blocked);
//! ```

pub mod rules;

pub use rules::{default_rules, DetectorRule, RiskThresholds, RuleCategory, WhitelistEntry};

use crate::config::RiskConfig;
use regex::{Regex, RegexBuilder};
use sdk::errors::EngineError;
use sdk::{Action, ActionKind, RiskLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of classifying one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskReport {
    pub label: RiskLevel,
    pub score: u32,
    pub blocked: bool,
    pub requires_confirmation: bool,
    /// Names of matched rules, in rule order
    pub matched_rules: Vec<String>,
    #[serde(default)]
    pub whitelisted: bool,
}

impl RiskReport {
    /// Whether the action may run without asking anyone
    pub fn is_auto(&self) -> bool {
        !self.blocked && !self.requires_confirmation
    }
}

struct CompiledRule {
    name: String,
    regex: Regex,
    weight: u32,
    actions: Vec<String>,
    parameter: Option<String>,
}

/// Config-driven risk classifier
pub struct RiskEngine {
    rules: Vec<CompiledRule>,
    thresholds: RiskThresholds,
    medium_requires_confirmation: bool,
    whitelist: Vec<(String, Value)>,
}

impl RiskEngine {
    /// Build an engine from the `[risk]` configuration section
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` if a rule pattern does not compile or the
    /// thresholds are not strictly increasing and positive.
    pub fn from_config(config: &RiskConfig) -> Result<Self, EngineError> {
        let t = config.thresholds;
        if t.medium == 0 || t.medium >= t.high || t.high >= t.dangerous {
            return Err(EngineError::Config(format!(
                "risk thresholds must satisfy 0 < medium < high < dangerous (got {}, {}, {})",
                t.medium, t.high, t.dangerous
            )));
        }

        let rules = config
            .rules
            .iter()
            .map(compile_rule)
            .collect::<Result<Vec<_>, _>>()?;

        let whitelist = config
            .whitelist
            .iter()
            .map(|entry| {
                let action = canonical_action_name(&entry.action);
                // Store the signature the way assess_action will see it
                let parameters = Action::from_parts(&action, &entry.parameters)
                    .map(|typed| typed.parameters())
                    .unwrap_or_else(|_| entry.parameters.clone());
                let parameters = normalize_parameters(&action, &parameters);
                (action, parameters)
            })
            .collect();

        Ok(Self {
            rules,
            thresholds: t,
            medium_requires_confirmation: config.medium_requires_confirmation,
            whitelist,
        })
    }

    /// Engine with the shipped rules and thresholds
    pub fn with_defaults() -> Result<Self, EngineError> {
        Self::from_config(&RiskConfig::default())
    }

    /// Classify a validated action
    ///
    /// Scores the canonical parameters, so keys the schema accepts as aliases
    /// (`operation` for `op`, `dest` for `destination`) hit the same rules.
    pub fn assess_action(&self, action: &Action) -> RiskReport {
        self.assess(action.kind().name(), &action.parameters())
    }

    /// Classify a raw `(action, parameters)` pair as written
    pub fn assess(&self, action_name: &str, parameters: &Value) -> RiskReport {
        let action = canonical_action_name(action_name);
        let parameters = normalize_parameters(&action, parameters);
        let subject = canonical_subject(&action, &parameters);

        let mut score: u32 = 0;
        let mut matched_rules = Vec::new();

        for rule in &self.rules {
            if !rule.actions.is_empty() && !rule.actions.iter().any(|a| a == &action) {
                continue;
            }

            let hit = match &rule.parameter {
                Some(key) => parameters
                    .get(key)
                    .map(render_value)
                    .is_some_and(|value| rule.regex.is_match(&value)),
                None => rule.regex.is_match(&subject),
            };

            if hit {
                score = score.saturating_add(rule.weight);
                matched_rules.push(rule.name.clone());
            }
        }

        let label = self.label_for(score);
        let whitelisted = self.is_whitelisted(&action, &parameters);

        let (blocked, requires_confirmation) = match label {
            RiskLevel::Dangerous if whitelisted => (false, true),
            RiskLevel::Dangerous => (true, false),
            RiskLevel::High => (false, true),
            RiskLevel::Medium => (false, self.medium_requires_confirmation),
            RiskLevel::Low => (false, false),
        };

        RiskReport {
            label,
            score,
            blocked,
            requires_confirmation,
            matched_rules,
            whitelisted,
        }
    }

    fn label_for(&self, score: u32) -> RiskLevel {
        if score >= self.thresholds.dangerous {
            RiskLevel::Dangerous
        } else if score >= self.thresholds.high {
            RiskLevel::High
        } else if score >= self.thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    fn is_whitelisted(&self, action: &str, parameters: &Value) -> bool {
        self.whitelist
            .iter()
            .any(|(name, params)| name == action && params == parameters)
    }
}

fn compile_rule(rule: &DetectorRule) -> Result<CompiledRule, EngineError> {
    let regex = RegexBuilder::new(&rule.pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| {
            EngineError::Config(format!("Invalid pattern for risk rule '{}': {}", rule.name, e))
        })?;

    Ok(CompiledRule {
        name: rule.name.clone(),
        regex,
        weight: rule.weight,
        actions: rule
            .actions
            .iter()
            .map(|a| canonical_action_name(a))
            .collect(),
        parameter: rule.parameter.clone(),
    })
}

/// Resolve aliases to the canonical name; unknown names are kept, lowercased
fn canonical_action_name(name: &str) -> String {
    ActionKind::from_name(name)
        .map(|kind| kind.name().to_string())
        .unwrap_or_else(|| name.trim().to_ascii_lowercase())
}

/// Parameter keys holding a filesystem path, per canonical action
const PATH_PARAMETERS: &[(&str, &str)] = &[("file_op", "path"), ("file_op", "destination")];

fn normalize_parameters(action: &str, parameters: &Value) -> Value {
    let mut parameters = match parameters {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    };

    if let Value::Object(map) = &mut parameters {
        for (_, key) in PATH_PARAMETERS.iter().filter(|(a, _)| *a == action) {
            if let Some(Value::String(path)) = map.get_mut(*key) {
                *path = normalize_path(path);
            }
        }
    }
    parameters
}

/// Resolve `.` and `..` without touching the filesystem
///
/// Both separators are accepted and the result uses `/`. A relative path
/// keeps any `..` that climbs above its starting point; an absolute path
/// cannot climb above the root.
fn normalize_path(raw: &str) -> String {
    let absolute = raw.starts_with('/') || raw.starts_with('\\');
    let mut parts: Vec<&str> = Vec::new();

    for part in raw.split(|c: char| c == '/' || c == '\\') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(last) if *last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// `action key=value key=value` with keys sorted
fn canonical_subject(action: &str, parameters: &Value) -> String {
    let mut subject = action.to_string();
    match parameters {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                if let Some(value) = map.get(key) {
                    subject.push(' ');
                    subject.push_str(key);
                    subject.push('=');
                    subject.push_str(&render_value(value));
                }
            }
        }
        other => {
            subject.push(' ');
            subject.push_str(&render_value(other));
        }
    }
    subject
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join(" "),
        Value::Object(_) => canonical_subject("", value).trim_start().to_string(),
        other => other.to_string(),
    }
}
