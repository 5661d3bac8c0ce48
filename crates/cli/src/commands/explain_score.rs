//! `frontdesk explain-score`: score a lead profile offline and show why.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use frontdesk_core::scoring::{self, CompiledRule, LeadProfile, ScoringRule};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
pub struct ScoreReport {
    pub score: u8,
    pub is_hot: bool,
    pub threshold: u8,
    pub explanation: String,
    pub matched_rules: Vec<String>,
    pub unsupported_rules: Vec<String>,
}

pub fn run(profile_path: &Path, rules_path: Option<&Path>, threshold: u8) -> CommandResult {
    let loaded = load_inputs(profile_path, rules_path);
    let (profile, rules) = match loaded {
        Ok(inputs) => inputs,
        Err(error) => {
            return CommandResult::failure("explain-score", "input", format!("{error:#}"), 2);
        }
    };

    let report = explain(&profile, &rules, threshold);
    match serde_json::to_value(&report) {
        Ok(details) => {
            CommandResult::success_with_details("explain-score", report.explanation.clone(), details)
        }
        Err(error) => CommandResult::failure("explain-score", "serialization", error.to_string(), 3),
    }
}

fn load_inputs(
    profile_path: &Path,
    rules_path: Option<&Path>,
) -> Result<(LeadProfile, Vec<ScoringRule>)> {
    let raw = fs::read_to_string(profile_path)
        .with_context(|| format!("cannot read profile `{}`", profile_path.display()))?;
    let profile = parse_profile(&raw)
        .with_context(|| format!("invalid profile `{}`", profile_path.display()))?;

    let rules = match rules_path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("cannot read rules `{}`", path.display()))?;
            serde_json::from_str::<Vec<ScoringRule>>(&raw)
                .with_context(|| format!("invalid rules `{}`", path.display()))?
        }
        None => Vec::new(),
    };

    Ok((profile, rules))
}

pub fn parse_profile(raw: &str) -> Result<LeadProfile> {
    Ok(serde_json::from_str::<LeadProfile>(raw)?)
}

/// Applies rules and heuristics exactly as the lead tool does.
pub fn explain(profile: &LeadProfile, rules: &[ScoringRule], threshold: u8) -> ScoreReport {
    let compiled: Vec<CompiledRule> = rules.iter().map(ScoringRule::compile).collect();
    let score = scoring::score(&compiled, profile, profile.service_type.as_deref());
    let data = profile.to_value();

    ScoreReport {
        score,
        is_hot: scoring::is_hot(score, threshold),
        threshold,
        explanation: scoring::explain(score, profile),
        matched_rules: compiled
            .iter()
            .filter(|rule| rule.matches(&data))
            .map(|rule| rule.rule_name.clone())
            .collect(),
        unsupported_rules: compiled
            .iter()
            .filter(|rule| rule.has_unsupported_conditions())
            .map(|rule| rule.rule_name.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use frontdesk_core::scoring::{ScoringRule, DEFAULT_HOT_THRESHOLD};
    use serde_json::json;

    use super::{explain, parse_profile};

    #[test]
    fn urgent_office_lead_is_hot() {
        let profile = parse_profile(
            r#"{
                "name": "Jo", "phone": "+447700900001", "email": "jo@example.com",
                "service_type": "office_cleaning",
                "service_data": {"size": "1000+ sqm", "frequency": "daily"},
                "urgency": "within_48h"
            }"#,
        )
        .expect("profile");

        let report = explain(&profile, &[], DEFAULT_HOT_THRESHOLD);
        // 3 urgency + 2 size + 2 frequency + 1 complete contact
        assert_eq!(report.score, 8);
        assert!(report.is_hot);
        assert!(report.explanation.starts_with("Score: 8/10\n"));
        assert!(report.explanation.contains("- Urgent (within 48 hours): +3 points"));
    }

    #[test]
    fn rules_are_reported_by_name() {
        let profile = parse_profile(r#"{"urgency": "flexible"}"#).expect("profile");
        let rules: Vec<ScoringRule> = serde_json::from_value(json!([
            {
                "employee_type_id": "receptionist",
                "rule_name": "flexible_bonus",
                "conditions": {"urgency": "flexible"},
                "score_adjustment": 2
            },
            {
                "employee_type_id": "receptionist",
                "rule_name": "odd_shape",
                "conditions": {"urgency": {"$regex": "^flex"}},
                "score_adjustment": 5
            }
        ]))
        .expect("rules");

        let report = explain(&profile, &rules, DEFAULT_HOT_THRESHOLD);
        assert_eq!(report.score, 2);
        assert!(!report.is_hot);
        assert_eq!(report.matched_rules, vec!["flexible_bonus".to_string()]);
        assert_eq!(report.unsupported_rules, vec!["odd_shape".to_string()]);
        assert_eq!(report.explanation, "Score: 2/10 (Standard lead)");
    }

    #[test]
    fn malformed_profile_is_an_error() {
        assert!(parse_profile("{not json").is_err());
    }
}
