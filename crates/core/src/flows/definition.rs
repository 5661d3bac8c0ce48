use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::agent::EmployeeTypeId;
use crate::flows::state::{COMPLETE_STEP, INITIAL_STEP};

pub const DATA_COLLECTION_STEP: &str = "data_collection";

/// A declarative branching script for one employee type.
///
/// Definitions are edited independently of the code that runs them, so every
/// step field is optional on the wire and unknown keys are ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: String,
    pub employee_type_id: EmployeeTypeId,
    pub flow_name: String,
    pub version: i64,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
    pub steps: Vec<FlowStep>,
}

/// The stored JSON document holding the steps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDocument {
    #[serde(default)]
    pub steps: Vec<FlowStep>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub id: String,
    #[serde(rename = "type", default = "default_step_kind")]
    pub kind: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub data_field: Option<String>,
    #[serde(default)]
    pub data_fields: Vec<String>,
    #[serde(default)]
    pub branches: Vec<FlowBranch>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowBranch {
    #[serde(default)]
    pub condition: String,
    #[serde(default, alias = "target")]
    pub next_step: Option<String>,
}

fn default_step_kind() -> String {
    "question".to_string()
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowDefinitionError {
    #[error("flow `{flow}` declares step `{step}` more than once")]
    DuplicateStep { flow: String, step: String },
    #[error("flow `{flow}` has no `{INITIAL_STEP}` step")]
    MissingInitialStep { flow: String },
    #[error("flow `{flow}` step `{step}` points at unknown step `{target}`")]
    UnknownTarget { flow: String, step: String, target: String },
}

impl FlowStep {
    pub fn collects_data(&self) -> bool {
        self.kind == DATA_COLLECTION_STEP
    }

    /// Every field this step asks for, single field first.
    pub fn required_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::with_capacity(self.data_fields.len() + 1);
        if let Some(field) = self.data_field.as_deref() {
            fields.push(field);
        }
        for field in &self.data_fields {
            if !fields.contains(&field.as_str()) {
                fields.push(field);
            }
        }
        fields
    }
}

impl FlowDefinition {
    pub fn step(&self, id: &str) -> Option<&FlowStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn has_step(&self, id: &str) -> bool {
        id == COMPLETE_STEP || self.step(id).is_some()
    }

    /// Structural check run when a definition is loaded. Problems are reported,
    /// the engine still runs and resolves dangling targets to `complete`.
    pub fn validate(&self) -> Result<(), Vec<FlowDefinitionError>> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                problems.push(FlowDefinitionError::DuplicateStep {
                    flow: self.flow_name.clone(),
                    step: step.id.clone(),
                });
            }
        }

        if self.step(INITIAL_STEP).is_none() {
            problems.push(FlowDefinitionError::MissingInitialStep { flow: self.flow_name.clone() });
        }

        for step in &self.steps {
            let targets = step
                .branches
                .iter()
                .filter_map(|branch| branch.next_step.as_deref())
                .chain(step.next.as_deref());
            for target in targets {
                if !self.has_step(target) {
                    problems.push(FlowDefinitionError::UnknownTarget {
                        flow: self.flow_name.clone(),
                        step: step.id.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
