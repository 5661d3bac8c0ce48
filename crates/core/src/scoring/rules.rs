//! Configured scoring rules and their condition predicates.
//!
//! Rule conditions are authored as loose JSON. They are parsed once into
//! [`Predicate`] values; any shape the parser does not recognise becomes
//! [`Predicate::Unsupported`] and never matches.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::agent::EmployeeTypeId;

/// A rule as stored: raw conditions plus the adjustment applied when all match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoringRule {
    pub employee_type_id: EmployeeTypeId,
    pub rule_name: String,
    pub conditions: Map<String, Value>,
    pub score_adjustment: i32,
}

/// A rule with its conditions parsed into predicates.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledRule {
    pub rule_name: String,
    pub conditions: Vec<(String, Predicate)>,
    pub score_adjustment: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Equality against a string, number or boolean.
    Literal(Value),
    /// The value must equal one of the listed values.
    OneOf(Vec<Value>),
    /// Operator object. Every operator present must hold.
    Compare { gte: Option<Value>, lte: Option<Value>, one_of: Option<Vec<Value>> },
    Unsupported,
}

impl ScoringRule {
    pub fn compile(&self) -> CompiledRule {
        CompiledRule {
            rule_name: self.rule_name.clone(),
            conditions: self
                .conditions
                .iter()
                .map(|(path, raw)| (path.clone(), Predicate::parse(raw)))
                .collect(),
            score_adjustment: self.score_adjustment,
        }
    }
}

impl CompiledRule {
    pub fn has_unsupported_conditions(&self) -> bool {
        self.conditions.iter().any(|(_, predicate)| matches!(predicate, Predicate::Unsupported))
    }

    /// True when every condition matches. An empty condition set always matches.
    pub fn matches(&self, data: &Value) -> bool {
        self.conditions.iter().all(|(path, predicate)| predicate.matches(lookup(data, path)))
    }
}

impl Predicate {
    pub fn parse(raw: &Value) -> Self {
        match raw {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => Self::Literal(raw.clone()),
            Value::Array(items) => Self::OneOf(items.clone()),
            Value::Object(operators) => {
                let known = ["$gte", "$lte", "$in"];
                let unknown_operator = operators.keys().any(|key| !known.contains(&key.as_str()));
                if operators.is_empty() || unknown_operator {
                    return Self::Unsupported;
                }
                let one_of = match operators.get("$in") {
                    None => None,
                    Some(Value::Array(items)) => Some(items.clone()),
                    Some(_) => return Self::Unsupported,
                };
                Self::Compare {
                    gte: operators.get("$gte").cloned(),
                    lte: operators.get("$lte").cloned(),
                    one_of,
                }
            }
            Value::Null => Self::Unsupported,
        }
    }

    pub fn matches(&self, value: Option<&Value>) -> bool {
        let Some(value) = value.filter(|value| !value.is_null()) else {
            return false;
        };

        match self {
            Self::Literal(expected) => loosely_equal(value, expected),
            Self::OneOf(options) => options.iter().any(|option| loosely_equal(value, option)),
            Self::Compare { gte, lte, one_of } => {
                let gte_ok = gte.as_ref().map_or(true, |bound| {
                    matches!(compare(value, bound), Some(Ordering::Greater | Ordering::Equal))
                });
                let lte_ok = lte.as_ref().map_or(true, |bound| {
                    matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
                });
                let in_ok = one_of
                    .as_ref()
                    .map_or(true, |options| options.iter().any(|option| loosely_equal(value, option)));
                gte_ok && lte_ok && in_ok
            }
            Self::Unsupported => false,
        }
    }
}

/// Resolves a dotted path such as `service_data.size`.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, segment| current.as_object()?.get(segment))
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use crate::domain::agent::EmployeeTypeId;

    use super::{lookup, Predicate, ScoringRule};

    fn rule(conditions: Value, adjustment: i32) -> ScoringRule {
        let conditions: Map<String, Value> = match conditions {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ScoringRule {
            employee_type_id: EmployeeTypeId("receptionist".to_string()),
            rule_name: "test".to_string(),
            conditions,
            score_adjustment: adjustment,
        }
    }

    #[test]
    fn dotted_paths_traverse_nested_objects() {
        let data = json!({ "service_data": { "site": { "floors": 4 } } });
        assert_eq!(lookup(&data, "service_data.site.floors"), Some(&json!(4)));
        assert_eq!(lookup(&data, "service_data.missing"), None);
        assert_eq!(lookup(&data, "service_data.site.floors.deeper"), None);
    }

    #[test]
    fn literal_and_list_predicates() {
        let data = json!({ "urgency": "within_48h", "service_data": { "frequency": "daily" } });

        assert!(rule(json!({ "urgency": "within_48h" }), 2).compile().matches(&data));
        assert!(!rule(json!({ "urgency": "within_7days" }), 2).compile().matches(&data));
        assert!(rule(json!({ "service_data.frequency": ["daily", "weekly"] }), 1)
            .compile()
            .matches(&data));
    }

    #[test]
    fn operator_predicates_require_every_operator() {
        let data = json!({ "service_data": { "desks": 40 } });

        assert!(rule(json!({ "service_data.desks": { "$gte": 20 } }), 1).compile().matches(&data));
        assert!(rule(json!({ "service_data.desks": { "$gte": 20, "$lte": 50 } }), 1)
            .compile()
            .matches(&data));
        assert!(!rule(json!({ "service_data.desks": { "$gte": 20, "$lte": 30 } }), 1)
            .compile()
            .matches(&data));
        assert!(rule(json!({ "service_data.desks": { "$in": [40, 80] } }), 1)
            .compile()
            .matches(&data));
    }

    #[test]
    fn unknown_shapes_never_match() {
        assert_eq!(Predicate::parse(&json!({ "$regex": "^a" })), Predicate::Unsupported);
        assert_eq!(Predicate::parse(&json!({ "$in": "daily" })), Predicate::Unsupported);
        assert_eq!(Predicate::parse(&Value::Null), Predicate::Unsupported);

        let compiled = rule(json!({ "urgency": { "$near": 1 } }), 5).compile();
        assert!(compiled.has_unsupported_conditions());
        assert!(!compiled.matches(&json!({ "urgency": 1 })));
    }

    #[test]
    fn missing_data_does_not_match() {
        let compiled = rule(json!({ "service_data.size": { "$gte": 100 } }), 1).compile();
        assert!(!compiled.matches(&json!({})));
        assert!(!compiled.matches(&json!({ "service_data": { "size": null } })));
    }
}
