use serde::{Deserialize, Serialize};

use crate::domain::approval::FlowStatus;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    /// Steps were resolved and persisted; the first step becomes active.
    StepsResolved,
    StepApproved,
    StepRejected,
}

/// Position of the flow inside its step chain at the moment an event is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContext {
    pub current_step: u32,
    pub total_steps: u32,
}

impl FlowContext {
    pub fn new(current_step: u32, total_steps: u32) -> Self {
        Self { current_step, total_steps }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    ActivateStep(u32),
    MarkStepApproved,
    MarkStepRejected,
    MoveToStep(u32),
    FinalizeApproved,
    FinalizeRejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowStatus,
    pub to: FlowStatus,
    pub event: FlowEvent,
    /// Value of the flow's `current_step` after the transition.
    pub current_step: u32,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}
