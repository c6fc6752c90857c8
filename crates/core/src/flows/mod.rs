pub mod engine;
pub mod states;

pub use engine::{next_step_number, ApprovalFlowMachine, FlowTransitionError};
pub use states::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};
