use serde_json::{Map, Value};

use crate::flows::definition::{FlowDefinition, FlowStep};
use crate::flows::state::{FlowPatch, FlowState, COMPLETE_STEP};

/// Runs one flow definition. Pure: no I/O, same input always gives the same output.
#[derive(Clone, Debug)]
pub struct FlowEngine {
    definition: FlowDefinition,
}

/// A computed step change, ready to be persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowTransition {
    pub from: String,
    pub patch: FlowPatch,
    /// Set when the definition pointed at a step that does not exist.
    pub unresolved_target: Option<String>,
}

impl FlowEngine {
    pub fn new(definition: FlowDefinition) -> Self {
        Self { definition }
    }

    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    pub fn initialize(&self) -> FlowState {
        FlowState::initial(&self.definition)
    }

    /// `None` when the state points at an id the definition does not have.
    /// The flow is then paused rather than failed.
    pub fn current_step<'a>(&'a self, state: &FlowState) -> Option<&'a FlowStep> {
        self.definition.step(&state.current_step)
    }

    /// Branches are tried in order; a branch fires when its condition is a
    /// case-insensitive substring of the message. Only the first firing branch
    /// counts, and one without a `next_step` falls through to the step's `next`.
    pub fn advance(&self, step: &FlowStep, message: &str) -> (String, Option<String>) {
        let haystack = message.to_lowercase();
        let fired = step
            .branches
            .iter()
            .find(|branch| haystack.contains(&branch.condition.to_lowercase()));

        let target = fired
            .and_then(|branch| branch.next_step.as_deref())
            .or(step.next.as_deref())
            .unwrap_or(COMPLETE_STEP);
        if self.definition.has_step(target) {
            (target.to_string(), None)
        } else {
            (COMPLETE_STEP.to_string(), Some(target.to_string()))
        }
    }

    /// Data collection steps store the whole trimmed message; no parsing.
    pub fn extract(&self, step: &FlowStep, message: &str) -> Map<String, Value> {
        let mut extracted = Map::new();
        if step.collects_data() {
            if let Some(field) = step.data_field.as_deref() {
                extracted.insert(field.to_string(), Value::String(message.trim().to_string()));
            }
        }
        extracted
    }

    pub fn transition(&self, state: &FlowState, message: &str) -> Option<FlowTransition> {
        let step = self.current_step(state)?;
        let extracted = self.extract(step, message);
        let (next_step, unresolved_target) = self.advance(step, message);
        Some(FlowTransition {
            from: step.id.clone(),
            patch: FlowPatch { next_step, extracted },
            unresolved_target,
        })
    }

    pub fn augment_prompt(&self, base_prompt: &str, state: &FlowState) -> String {
        let Some(step) = self.current_step(state) else {
            return base_prompt.to_string();
        };

        let question = step.question.as_deref().unwrap_or("Continue the conversation naturally.");
        let collected = serde_json::to_string_pretty(&state.collected_data)
            .unwrap_or_else(|_| "{}".to_string());
        let fields = step.required_fields();
        let required = if fields.is_empty() { "None".to_string() } else { fields.join(", ") };
        let next = step.next.as_deref().unwrap_or("Complete");

        format!(
            "{base_prompt}\n\n## CONVERSATION FLOW CONTEXT\n\n\
             You are currently at step: {current}\n\n\
             Current Step Instructions:\n{question}\n\n\
             Data Collected So Far:\n{collected}\n\n\
             Required Fields for This Step:\n{required}\n\n\
             Next Step After This:\n{next}\n\n\
             IMPORTANT:\n\
             - Ask the question naturally and conversationally\n\
             - Extract the required data from the user's response\n\
             - Don't mention you're following a script\n\
             - Be helpful and friendly (UK English, professional tone)\n",
            current = state.current_step,
        )
    }

    pub fn is_complete(&self, state: &FlowState) -> bool {
        state.is_complete()
    }

    pub fn collected_data<'a>(&self, state: &'a FlowState) -> &'a Map<String, Value> {
        &state.collected_data
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use crate::domain::agent::EmployeeTypeId;
    use crate::flows::definition::{FlowBranch, FlowDefinition, FlowDocument};
    use crate::flows::state::COMPLETE_STEP;

    use super::FlowEngine;

    fn cleaning_flow() -> FlowEngine {
        let document: FlowDocument = serde_json::from_value(json!({
            "steps": [
                { "id": "greeting", "question": "How can we help?", "next": "service_selection" },
                {
                    "id": "service_selection",
                    "question": "Which service do you need?",
                    "branches": [
                        { "condition": "cleaning", "next_step": "cleaning_details" },
                        { "condition": "tenancy", "next_step": "tenancy_details" },
                        { "condition": "airbnb", "next_step": "ghost_step" }
                    ],
                    "next": "general_enquiry"
                },
                {
                    "id": "cleaning_details",
                    "type": "data_collection",
                    "question": "Roughly how large is the space?",
                    "data_field": "size",
                    "next": "contact_details"
                },
                { "id": "tenancy_details", "next": "contact_details" },
                { "id": "general_enquiry" },
                { "id": "contact_details", "type": "data_collection", "data_field": "phone" }
            ]
        }))
        .expect("flow document");

        FlowEngine::new(FlowDefinition {
            id: "flow-1".to_string(),
            employee_type_id: EmployeeTypeId("receptionist".to_string()),
            flow_name: "office_cleaning".to_string(),
            version: 3,
            is_active: true,
            updated_at: Utc::now(),
            steps: document.steps,
        })
    }

    #[test]
    fn initialize_starts_at_greeting_with_empty_data() {
        let engine = cleaning_flow();
        let state = engine.initialize();

        assert_eq!(state.flow_id, "flow-1");
        assert_eq!(state.flow_name, "office_cleaning");
        assert_eq!(state.current_step, "greeting");
        assert!(state.collected_data.is_empty());
        assert!(state.step_history.is_empty());
        assert!(!engine.is_complete(&state));
    }

    #[test]
    fn matching_branch_wins_over_default_next() {
        let engine = cleaning_flow();
        let step = engine.definition().step("service_selection").expect("step");

        let (next, unresolved) = engine.advance(step, "I need office CLEANING quotes");
        assert_eq!(next, "cleaning_details");
        assert_eq!(unresolved, None);
    }

    #[test]
    fn first_matching_branch_in_declaration_order_wins() {
        let engine = cleaning_flow();
        let step = engine.definition().step("service_selection").expect("step");

        let (next, _) = engine.advance(step, "end of tenancy cleaning please");
        assert_eq!(next, "cleaning_details");
    }

    #[test]
    fn falls_back_to_next_then_complete() {
        let engine = cleaning_flow();
        let selection = engine.definition().step("service_selection").expect("step");
        assert_eq!(engine.advance(selection, "just a question").0, "general_enquiry");

        let terminal = engine.definition().step("general_enquiry").expect("step");
        assert_eq!(engine.advance(terminal, "thanks").0, COMPLETE_STEP);
    }

    #[test]
    fn unknown_branch_target_resolves_to_complete() {
        let engine = cleaning_flow();
        let step = engine.definition().step("service_selection").expect("step");

        let (next, unresolved) = engine.advance(step, "airbnb turnover");
        assert_eq!(next, COMPLETE_STEP);
        assert_eq!(unresolved.as_deref(), Some("ghost_step"));
    }

    #[test]
    fn branch_without_target_falls_through_to_next() {
        let engine = cleaning_flow();
        let mut step = engine.definition().step("service_selection").expect("step").clone();
        step.branches.insert(0, FlowBranch { condition: "quote".to_string(), next_step: None });

        let (next, unresolved) = engine.advance(&step, "a quote for office cleaning");
        assert_eq!(next, "general_enquiry");
        assert_eq!(unresolved, None);
    }

    #[test]
    fn advance_is_deterministic() {
        let engine = cleaning_flow();
        let step = engine.definition().step("service_selection").expect("step");

        let first = engine.advance(step, "tenancy clean");
        for _ in 0..10 {
            assert_eq!(engine.advance(step, "tenancy clean"), first);
        }
    }

    #[test]
    fn extract_only_fires_for_data_collection_steps() {
        let engine = cleaning_flow();
        let details = engine.definition().step("cleaning_details").expect("step");
        let extracted = engine.extract(details, "  about 600 square metres \n");
        assert_eq!(extracted.get("size"), Some(&json!("about 600 square metres")));

        let question = engine.definition().step("greeting").expect("step");
        assert!(engine.extract(question, "hello").is_empty());
    }

    #[test]
    fn transition_merges_into_state() {
        let engine = cleaning_flow();
        let mut state = engine.initialize();
        state.current_step = "cleaning_details".to_string();

        let transition = engine.transition(&state, "1000+ sqm").expect("step is known");
        let next = state.merge(&transition.patch);

        assert_eq!(transition.from, "cleaning_details");
        assert_eq!(next.current_step, "contact_details");
        assert_eq!(next.collected_data.get("size"), Some(&json!("1000+ sqm")));
        assert_eq!(next.step_history, vec!["contact_details".to_string()]);
    }

    #[test]
    fn unknown_current_step_pauses_the_flow() {
        let engine = cleaning_flow();
        let mut state = engine.initialize();
        state.current_step = "retired_step".to_string();

        assert!(engine.current_step(&state).is_none());
        assert!(engine.transition(&state, "hello").is_none());
        assert_eq!(engine.augment_prompt("BASE", &state), "BASE");
    }

    #[test]
    fn augmented_prompt_describes_the_active_step() {
        let engine = cleaning_flow();
        let mut state = engine.initialize();
        state.current_step = "cleaning_details".to_string();
        state.collected_data.insert("name".to_string(), json!("Jo"));

        let prompt = engine.augment_prompt("BASE", &state);

        assert!(prompt.starts_with("BASE\n\n## CONVERSATION FLOW CONTEXT"));
        assert!(prompt.contains("You are currently at step: cleaning_details"));
        assert!(prompt.contains("Roughly how large is the space?"));
        assert!(prompt.contains("\"name\": \"Jo\""));
        assert!(prompt.contains("Required Fields for This Step:\nsize"));
        assert!(prompt.contains("Next Step After This:\ncontact_details"));
        assert!(prompt.contains("Don't mention you're following a script"));
    }
}
