use serde_json::Value;

use crate::scoring::LeadProfile;

pub const OFFICE_CLEANING: &str = "office_cleaning";
pub const FM_SUPPORT: &str = "fm_support";
pub const AIRBNB: &str = "airbnb";
pub const END_OF_TENANCY: &str = "end_of_tenancy";

/// One heuristic that fired, with the points it added.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contribution {
    pub label: &'static str,
    pub points: i32,
}

impl Contribution {
    const fn new(label: &'static str, points: i32) -> Self {
        Self { label, points }
    }
}

/// Every heuristic contribution for a profile. Scoring sums these and the
/// explanation prints them, so the two cannot drift apart.
pub fn contributions(profile: &LeadProfile, service_type: Option<&str>) -> Vec<Contribution> {
    let mut fired = Vec::new();

    match profile.urgency.as_deref() {
        Some("within_48h") => fired.push(Contribution::new("Urgent (within 48 hours)", 3)),
        Some("within_7days") => fired.push(Contribution::new("Short timeline (within 7 days)", 2)),
        Some("within_30days") => fired.push(Contribution::new("Timeline within 30 days", 1)),
        _ => {}
    }

    let data = &profile.service_data;
    match service_type {
        Some(OFFICE_CLEANING) | Some(FM_SUPPORT) => {
            let size = data.get("size").and_then(Value::as_str).unwrap_or_default();
            if size.contains("1000+") || size.contains("500-1000") {
                fired.push(Contribution::new("Large premises (500+ m²)", 2));
            }

            let frequency = data.get("frequency").and_then(Value::as_str).unwrap_or_default();
            if matches!(frequency, "daily" | "several_times_week") {
                fired.push(Contribution::new("High frequency (daily or several times a week)", 2));
            }

            match data.get("num_locations") {
                Some(Value::String(locations)) if locations.contains("4+") => {
                    fired.push(Contribution::new("Multiple locations (4+)", 2));
                }
                Some(Value::String(locations)) if locations.contains("2-3") => {
                    fired.push(Contribution::new("Multiple locations (2-3)", 1));
                }
                Some(Value::Number(count)) if count.as_i64().is_some_and(|count| count >= 4) => {
                    fired.push(Contribution::new("Multiple locations (4+)", 2));
                }
                _ => {}
            }
        }
        Some(AIRBNB) => {
            let checkouts = data.get("checkouts_per_week").map(text).unwrap_or_default();
            if checkouts.contains("4+") {
                fired.push(Contribution::new("High turnover (4+ checkouts a week)", 3));
            } else if checkouts.contains("2-3") {
                fired.push(Contribution::new("Regular turnover (2-3 checkouts a week)", 1));
            }
        }
        Some(END_OF_TENANCY) => {
            let property = data.get("property_type").and_then(Value::as_str).unwrap_or_default();
            if property.contains("3-bed") || property.contains("house") {
                fired.push(Contribution::new("Large property (3-bed or house)", 1));
            }
        }
        _ => {}
    }

    if profile.has_complete_contact() {
        fired.push(Contribution::new("Complete contact details", 1));
    }

    fired
}

fn text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
