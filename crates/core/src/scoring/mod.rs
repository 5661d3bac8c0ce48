//! Lead scoring: configured rules plus fixed service heuristics, clamped to 0..=10.

pub mod heuristics;
pub mod rules;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub use heuristics::Contribution;
pub use rules::{CompiledRule, Predicate, ScoringRule};

pub const MAX_SCORE: i32 = 10;
pub const DEFAULT_HOT_THRESHOLD: u8 = 7;

/// The data a lead is scored on: contact fields plus whatever the flow collected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadProfile {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub service_type: Option<String>,
    pub service_data: Map<String, Value>,
    pub urgency: Option<String>,
    pub source_channel: Option<String>,
}

impl LeadProfile {
    pub fn has_complete_contact(&self) -> bool {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
        present(&self.name) && present(&self.email) && present(&self.phone)
    }

    /// JSON view that rule conditions are evaluated against.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "phone": self.phone,
            "email": self.email,
            "notes": self.notes,
            "service_type": self.service_type,
            "service_data": self.service_data,
            "urgency": self.urgency,
            "source_channel": self.source_channel,
        })
    }
}

pub fn score(rules: &[CompiledRule], profile: &LeadProfile, service_type: Option<&str>) -> u8 {
    let data = profile.to_value();
    let from_rules: i32 = rules
        .iter()
        .filter(|rule| rule.matches(&data))
        .map(|rule| rule.score_adjustment)
        .sum();
    let from_heuristics: i32 = heuristics::contributions(profile, service_type)
        .iter()
        .map(|contribution| contribution.points)
        .sum();

    // Rule adjustments may be negative, so clamp both ends.
    let clamped = from_rules.saturating_add(from_heuristics).clamp(0, MAX_SCORE);
    u8::try_from(clamped).unwrap_or(0)
}

pub fn is_hot(score: u8, threshold: u8) -> bool {
    score >= threshold
}

/// Operator-facing breakdown of the heuristics that fired.
pub fn explain(score: u8, profile: &LeadProfile) -> String {
    let fired = heuristics::contributions(profile, profile.service_type.as_deref());
    if fired.is_empty() {
        return format!("Score: {score}/10 (Standard lead)");
    }

    let lines: Vec<String> = fired
        .iter()
        .map(|contribution| {
            let unit = if contribution.points == 1 { "point" } else { "points" };
            format!("- {}: +{} {unit}", contribution.label, contribution.points)
        })
        .collect();
    format!("Score: {score}/10\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use crate::domain::agent::EmployeeTypeId;

    use super::{explain, is_hot, score, LeadProfile, ScoringRule, DEFAULT_HOT_THRESHOLD};

    fn profile(service_type: &str, service_data: Value) -> LeadProfile {
        let service_data = match service_data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        LeadProfile {
            service_type: Some(service_type.to_string()),
            service_data,
            ..LeadProfile::default()
        }
    }

    fn rule(conditions: Value, adjustment: i32) -> ScoringRule {
        ScoringRule {
            employee_type_id: EmployeeTypeId("receptionist".to_string()),
            rule_name: "rule".to_string(),
            conditions: conditions.as_object().cloned().unwrap_or_default(),
            score_adjustment: adjustment,
        }
    }

    #[test]
    fn office_heuristics_add_up() {
        let mut lead = profile(
            "office_cleaning",
            json!({ "size": "500-1000 sqm", "frequency": "daily", "num_locations": "2-3" }),
        );
        lead.urgency = Some("within_7days".to_string());

        // 2 urgency + 2 size + 2 frequency + 1 locations
        assert_eq!(score(&[], &lead, Some("office_cleaning")), 7);
        assert!(is_hot(7, DEFAULT_HOT_THRESHOLD));
    }

    #[test]
    fn numeric_location_counts_are_understood() {
        let lead = profile("fm_support", json!({ "num_locations": 6 }));
        assert_eq!(score(&[], &lead, Some("fm_support")), 2);

        let small = profile("fm_support", json!({ "num_locations": 3 }));
        assert_eq!(score(&[], &small, Some("fm_support")), 0);
    }

    #[test]
    fn airbnb_and_tenancy_heuristics() {
        let airbnb = profile("airbnb", json!({ "checkouts_per_week": "4+" }));
        assert_eq!(score(&[], &airbnb, Some("airbnb")), 3);

        let tenancy = profile("end_of_tenancy", json!({ "property_type": "3-bed flat" }));
        assert_eq!(score(&[], &tenancy, Some("end_of_tenancy")), 1);

        // Heuristics are keyed by the service type argument.
        assert_eq!(score(&[], &airbnb, Some("office_cleaning")), 0);
    }

    #[test]
    fn score_is_clamped_to_zero_and_ten() {
        let mut lead = profile(
            "office_cleaning",
            json!({ "size": "1000+", "frequency": "daily", "num_locations": "4+" }),
        );
        lead.urgency = Some("within_48h".to_string());
        lead.name = Some("Jo".to_string());
        lead.email = Some("jo@example.com".to_string());
        lead.phone = Some("07700 900001".to_string());

        let bonus = rule(json!({ "urgency": "within_48h" }), 5).compile();
        assert_eq!(score(&[bonus], &lead, Some("office_cleaning")), 10);

        let penalty = rule(json!({}), -20).compile();
        assert_eq!(score(&[penalty], &lead, Some("office_cleaning")), 0);
    }

    #[test]
    fn rules_match_against_contact_and_service_data() {
        let mut lead = profile("office_cleaning", json!({ "sector": "healthcare" }));
        lead.source_channel = Some("whatsapp".to_string());

        let rules = vec![
            rule(json!({ "service_data.sector": ["healthcare", "education"] }), 3).compile(),
            rule(json!({ "source_channel": "voice" }), 4).compile(),
        ];
        assert_eq!(score(&rules, &lead, Some("office_cleaning")), 3);
        assert!(!is_hot(3, DEFAULT_HOT_THRESHOLD));
    }

    #[test]
    fn explanation_lists_what_fired() {
        let mut lead = profile("office_cleaning", json!({ "size": "1000+", "frequency": "daily" }));
        lead.urgency = Some("within_48h".to_string());
        lead.name = Some("Jo".to_string());
        lead.email = Some("jo@example.com".to_string());
        lead.phone = Some("07700 900001".to_string());

        let total = score(&[], &lead, lead.service_type.as_deref());
        assert_eq!(total, 8);
        assert_eq!(
            explain(total, &lead),
            "Score: 8/10\n\
             - Urgent (within 48 hours): +3 points\n\
             - Large premises (500+ m²): +2 points\n\
             - High frequency (daily or several times a week): +2 points\n\
             - Complete contact details: +1 point"
        );
    }

    #[test]
    fn explanation_for_plain_lead() {
        assert_eq!(explain(0, &LeadProfile::default()), "Score: 0/10 (Standard lead)");
    }
}
