use frontdesk_core::config::{AppConfig, LoadOptions};
use frontdesk_core::flows::FlowDefinition;
use frontdesk_core::scoring::ScoringRule;
use frontdesk_db::repositories::{SqlFlowDefinitionRepository, SqlScoringRuleRepository};
use frontdesk_db::{connect_with_settings, migrations};
use serde::Serialize;

const DATABASE_CHECKS: [&str; 3] = ["database_connectivity", "flow_definitions", "scoring_rules"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_model_gateway(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck {
                name: "model_gateway",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
            checks.extend(skipped(&DATABASE_CHECKS, "configuration did not load"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_model_gateway(config: &AppConfig) -> DoctorCheck {
    let credentials = match &config.llm.api_key {
        Some(_) => "api key set",
        None => "no api key (local gateway)",
    };
    DoctorCheck {
        name: "model_gateway",
        status: CheckStatus::Pass,
        details: format!(
            "model `{}` via `{}`, {credentials}",
            config.llm.model, config.llm.base_url
        ),
    }
}

fn skipped(names: &[&'static str], reason: &str) -> Vec<DoctorCheck> {
    names
        .iter()
        .copied()
        .map(|name| DoctorCheck {
            name,
            status: CheckStatus::Skipped,
            details: format!("skipped because {reason}"),
        })
        .collect()
}

/// Connects, migrates, then inspects what the pipeline will load at runtime.
fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let mut checks = vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
            checks.extend(skipped(&DATABASE_CHECKS[1..], "the database was not reachable"));
            return checks;
        }
    };

    runtime.block_on(async {
        let connected =
            connect_with_settings(&config.database.url, 1, config.database.timeout_secs).await;
        let pool = match connected {
            Ok(pool) => pool,
            Err(error) => {
                let mut checks = vec![DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to connect to database: {error}"),
                }];
                checks.extend(skipped(&DATABASE_CHECKS[1..], "the database was not reachable"));
                return checks;
            }
        };

        let checks = match migrations::run_pending(&pool).await {
            Ok(applied) => {
                let flows = SqlFlowDefinitionRepository::new(pool.clone()).list_active().await;
                let rules = SqlScoringRuleRepository::new(pool.clone()).list_all().await;
                vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Pass,
                        details: format!(
                            "connected to `{}`, {} migration(s) applied",
                            config.database.url,
                            applied.len()
                        ),
                    },
                    match flows {
                        Ok(flows) => check_flow_definitions(&flows),
                        Err(error) => DoctorCheck {
                            name: "flow_definitions",
                            status: CheckStatus::Fail,
                            details: format!("failed to load flow definitions: {error}"),
                        },
                    },
                    match rules {
                        Ok(rules) => check_scoring_rules(&rules),
                        Err(error) => DoctorCheck {
                            name: "scoring_rules",
                            status: CheckStatus::Fail,
                            details: format!("failed to load scoring rules: {error}"),
                        },
                    },
                ]
            }
            Err(error) => {
                let mut checks = vec![DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("database reachable but migrations failed: {error}"),
                }];
                checks.extend(skipped(&DATABASE_CHECKS[1..], "migrations did not apply"));
                checks
            }
        };

        pool.close().await;
        checks
    })
}

fn check_flow_definitions(flows: &[FlowDefinition]) -> DoctorCheck {
    let problems: Vec<String> = flows
        .iter()
        .filter_map(|flow| flow.validate().err())
        .flatten()
        .map(|problem| problem.to_string())
        .collect();

    if problems.is_empty() {
        DoctorCheck {
            name: "flow_definitions",
            status: CheckStatus::Pass,
            details: format!("{} active flow(s) are well formed", flows.len()),
        }
    } else {
        DoctorCheck {
            name: "flow_definitions",
            status: CheckStatus::Fail,
            details: problems.join("; "),
        }
    }
}

/// Rules with conditions the matcher cannot evaluate never fire, so they are flagged.
fn check_scoring_rules(rules: &[ScoringRule]) -> DoctorCheck {
    let unsupported: Vec<String> = rules
        .iter()
        .map(ScoringRule::compile)
        .filter(|rule| rule.has_unsupported_conditions())
        .map(|rule| rule.rule_name)
        .collect();

    if unsupported.is_empty() {
        DoctorCheck {
            name: "scoring_rules",
            status: CheckStatus::Pass,
            details: format!("{} scoring rule(s) compiled", rules.len()),
        }
    } else {
        DoctorCheck {
            name: "scoring_rules",
            status: CheckStatus::Fail,
            details: format!("unsupported conditions in: {}", unsupported.join(", ")),
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use frontdesk_core::domain::agent::EmployeeTypeId;
    use frontdesk_core::flows::{FlowDefinition, FlowDocument};
    use frontdesk_core::scoring::ScoringRule;
    use serde_json::json;

    use super::{check_flow_definitions, check_scoring_rules, CheckStatus};

    fn flow(name: &str, steps: serde_json::Value) -> FlowDefinition {
        let document: FlowDocument =
            serde_json::from_value(json!({ "steps": steps })).expect("flow document");
        FlowDefinition {
            id: format!("{name}-1"),
            employee_type_id: EmployeeTypeId("receptionist".to_string()),
            flow_name: name.to_string(),
            version: 1,
            is_active: true,
            updated_at: Utc::now(),
            steps: document.steps,
        }
    }

    #[test]
    fn broken_flows_fail_with_every_problem_listed() {
        let healthy = flow("office_cleaning", json!([{ "id": "greeting" }]));
        let broken = flow("tenancy", json!([{ "id": "ask_phone", "next": "nowhere" }]));

        let check = check_flow_definitions(&[healthy.clone()]);
        assert_eq!(check.status, CheckStatus::Pass);
        assert_eq!(check.details, "1 active flow(s) are well formed");

        let check = check_flow_definitions(&[healthy, broken]);
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.details.contains("flow `tenancy` has no `greeting` step"));
        assert!(check.details.contains("points at unknown step `nowhere`"));
    }

    #[test]
    fn rules_the_matcher_cannot_evaluate_are_named() {
        let rules: Vec<ScoringRule> = serde_json::from_value(json!([
            {
                "employee_type_id": "receptionist",
                "rule_name": "urgent",
                "conditions": {"urgency": "within_48h"},
                "score_adjustment": 2
            },
            {
                "employee_type_id": "receptionist",
                "rule_name": "pattern",
                "conditions": {"urgency": {"$regex": "^within"}},
                "score_adjustment": 1
            }
        ]))
        .expect("rules");

        assert_eq!(check_scoring_rules(&rules[..1]).status, CheckStatus::Pass);

        let check = check_scoring_rules(&rules);
        assert_eq!(check.status, CheckStatus::Fail);
        assert_eq!(check.details, "unsupported conditions in: pattern");
    }
}
