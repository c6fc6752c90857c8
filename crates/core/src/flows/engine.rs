use thiserror::Error;

use crate::domain::approval::FlowStatus;
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("flow in status {status:?} does not accept {event:?}")]
    InvalidTransition { status: FlowStatus, event: FlowEvent },
    #[error("flow has no resolvable steps")]
    NoSteps,
    #[error("current step {current_step} is outside the step chain 1..={total_steps}")]
    StepOutOfRange { current_step: u32, total_steps: u32 },
}

/// Returns the step that follows `current_step`, or `None` when `current_step` is the last one.
pub fn next_step_number(current_step: u32, total_steps: u32) -> Option<u32> {
    let next = current_step.checked_add(1)?;
    (next <= total_steps).then_some(next)
}

/// Strict step-sequence state machine: every resolved step must be approved in order, and any
/// rejection terminates the flow.
#[derive(Clone, Debug, Default)]
pub struct ApprovalFlowMachine;

impl ApprovalFlowMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_status(&self) -> FlowStatus {
        FlowStatus::Pending
    }

    pub fn apply(
        &self,
        current: &FlowStatus,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        use FlowAction::{
            ActivateStep, FinalizeApproved, FinalizeRejected, MarkStepApproved, MarkStepRejected,
            MoveToStep,
        };
        use FlowEvent::{StepApproved, StepRejected, StepsResolved};
        use FlowStatus::{Approved, InReview, Pending, Rejected};

        if context.total_steps == 0 {
            return Err(FlowTransitionError::NoSteps);
        }

        let in_range = (1..=context.total_steps).contains(&context.current_step);
        if !in_range && current.is_actionable() {
            return Err(FlowTransitionError::StepOutOfRange {
                current_step: context.current_step,
                total_steps: context.total_steps,
            });
        }

        let (to, current_step, actions) = match (current, event) {
            (Pending, StepsResolved) => (InReview, 1, vec![ActivateStep(1)]),
            (Pending, StepApproved) | (InReview, StepApproved) => {
                match next_step_number(context.current_step, context.total_steps) {
                    Some(next) => (InReview, next, vec![MarkStepApproved, MoveToStep(next)]),
                    None => (Approved, context.total_steps, vec![MarkStepApproved, FinalizeApproved]),
                }
            }
            (Pending, StepRejected) | (InReview, StepRejected) => {
                (Rejected, context.current_step, vec![MarkStepRejected, FinalizeRejected])
            }
            _ => {
                return Err(FlowTransitionError::InvalidTransition {
                    status: current.clone(),
                    event: event.clone(),
                });
            }
        };

        Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), current_step, actions })
    }
}
