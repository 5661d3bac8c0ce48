use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::flows::definition::FlowDefinition;

pub const INITIAL_STEP: &str = "greeting";
pub const COMPLETE_STEP: &str = "complete";

/// Per-conversation position inside a flow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowState {
    pub flow_id: String,
    pub flow_name: String,
    pub current_step: String,
    pub collected_data: Map<String, Value>,
    pub step_history: Vec<String>,
}

/// The outcome of one user message applied to a step.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowPatch {
    pub next_step: String,
    pub extracted: Map<String, Value>,
}

impl FlowState {
    pub fn initial(definition: &FlowDefinition) -> Self {
        Self {
            flow_id: definition.id.clone(),
            flow_name: definition.flow_name.clone(),
            current_step: INITIAL_STEP.to_string(),
            collected_data: Map::new(),
            step_history: Vec::new(),
        }
    }

    /// A stored `{}` decodes into this; treat it like no state at all.
    pub fn is_blank(&self) -> bool {
        self.flow_id.is_empty() && self.current_step.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.current_step == COMPLETE_STEP
    }

    pub fn merge(&self, patch: &FlowPatch) -> Self {
        let mut collected_data = self.collected_data.clone();
        for (field, value) in &patch.extracted {
            collected_data.insert(field.clone(), value.clone());
        }

        let mut step_history = self.step_history.clone();
        step_history.push(patch.next_step.clone());

        Self {
            flow_id: self.flow_id.clone(),
            flow_name: self.flow_name.clone(),
            current_step: patch.next_step.clone(),
            collected_data,
            step_history,
        }
    }
}
