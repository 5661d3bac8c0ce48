pub mod definition;
pub mod engine;
pub mod state;

pub use definition::{FlowBranch, FlowDefinition, FlowDefinitionError, FlowDocument, FlowStep};
pub use engine::{FlowEngine, FlowTransition};
pub use state::{FlowPatch, FlowState, COMPLETE_STEP, INITIAL_STEP};
