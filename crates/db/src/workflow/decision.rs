use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use opsflow_core::approvals::{StepAuthorization, StepAuthorizer};
use opsflow_core::audit::{ApprovalAction, AuditEntry};
use opsflow_core::domain::approval::{ApprovalStep, FlowId, FlowStatus, StepStatus};
use opsflow_core::domain::request::{RequestId, RequestStatusUpdate, UserId};
use opsflow_core::errors::WorkflowError;
use opsflow_core::flows::{ApprovalFlowMachine, FlowAction, FlowContext, FlowEvent};

use super::audit::AuditRecorder;
use super::membership::GroupMembershipResolver;
use crate::repositories::{
    RepositoryError, SqlApprovalFlowRepository, SqlApprovalStepRepository,
    SqlOpsRequestRepository,
};
use crate::{begin_write, DbPool};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    fn event(&self) -> FlowEvent {
        match self {
            Self::Approve => FlowEvent::StepApproved,
            Self::Reject => FlowEvent::StepRejected,
        }
    }
}

/// Acknowledgement of an applied decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionReceipt {
    pub flow_id: FlowId,
    pub request_id: RequestId,
    pub decision: Decision,
    /// The step the decision was recorded on.
    pub step_number: u32,
    pub flow_status: FlowStatus,
    /// Where the flow points after the decision.
    pub current_step: u32,
}

/// Applies approve and reject decisions to the current step of a flow.
#[derive(Clone, Debug)]
pub struct DecisionProcessor {
    pool: DbPool,
    authorizer: StepAuthorizer,
    membership: GroupMembershipResolver,
    machine: ApprovalFlowMachine,
    recorder: AuditRecorder,
}

impl DecisionProcessor {
    pub fn new(pool: DbPool, membership: GroupMembershipResolver) -> Self {
        Self {
            pool,
            authorizer: StepAuthorizer::new(),
            membership,
            machine: ApprovalFlowMachine::new(),
            recorder: AuditRecorder::new(),
        }
    }

    pub async fn approve(
        &self,
        flow_id: &FlowId,
        user_id: &UserId,
        note: &str,
    ) -> Result<DecisionReceipt, WorkflowError> {
        self.decide(flow_id, user_id, note, Decision::Approve).await
    }

    pub async fn reject(
        &self,
        flow_id: &FlowId,
        user_id: &UserId,
        reason: &str,
    ) -> Result<DecisionReceipt, WorkflowError> {
        self.decide(flow_id, user_id, reason, Decision::Reject).await
    }

    async fn decide(
        &self,
        flow_id: &FlowId,
        user_id: &UserId,
        note: &str,
        decision: Decision,
    ) -> Result<DecisionReceipt, WorkflowError> {
        let mut tx = begin_write(&self.pool).await.map_err(RepositoryError::from)?;

        let flow = SqlApprovalFlowRepository::new(&mut tx)
            .find_by_id(flow_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("approval flow", flow_id.0.clone()))?;
        if !flow.status.is_actionable() {
            return Err(WorkflowError::invalid_state(format!(
                "flow `{}` is already {}",
                flow.id,
                flow.status.as_str()
            )));
        }

        let step = SqlApprovalStepRepository::new(&mut tx)
            .find_by_number(&flow.id, flow.current_step)
            .await?
            .ok_or_else(|| {
                WorkflowError::invalid_state(format!(
                    "flow `{}` has no step {}",
                    flow.id, flow.current_step
                ))
            })?;
        if step.status != StepStatus::Pending {
            return Err(WorkflowError::invalid_state(format!(
                "step {} of flow `{}` is already {}",
                step.step_number,
                flow.id,
                step.status.as_str()
            )));
        }

        self.authorize(&mut tx, &step, user_id, decision).await?;

        let total_steps = SqlApprovalStepRepository::new(&mut tx).count_by_flow(&flow.id).await?;
        let outcome = self.machine.apply(
            &flow.status,
            &decision.event(),
            &FlowContext::new(flow.current_step, total_steps),
        )?;

        let now = Utc::now();
        for action in &outcome.actions {
            match action {
                FlowAction::MarkStepApproved | FlowAction::MarkStepRejected => {
                    let (status, logged) = if *action == FlowAction::MarkStepApproved {
                        (StepStatus::Approved, ApprovalAction::StepApproved)
                    } else {
                        (StepStatus::Rejected, ApprovalAction::StepRejected)
                    };
                    let resolved = SqlApprovalStepRepository::new(&mut tx)
                        .resolve(&step.id, &status, now, note)
                        .await?;
                    if !resolved {
                        return Err(stale(&flow.id));
                    }
                    self.recorder
                        .record(
                            &mut tx,
                            AuditEntry::new(flow.id.clone(), logged)
                                .with_step(step.id.clone())
                                .by(user_id.clone())
                                .with_note(note),
                            now,
                        )
                        .await?;
                }
                FlowAction::MoveToStep(next) => {
                    let advanced = SqlApprovalFlowRepository::new(&mut tx)
                        .advance(&flow.id, flow.current_step, *next, now)
                        .await?;
                    if !advanced {
                        return Err(stale(&flow.id));
                    }

                    let next_approver = SqlApprovalStepRepository::new(&mut tx)
                        .find_by_number(&flow.id, *next)
                        .await?
                        .and_then(|next_step| next_step.approver.user_id().cloned());
                    self.update_request(
                        &mut tx,
                        &flow.request_id,
                        RequestStatusUpdate::InReview { level: *next, current_approver: next_approver },
                    )
                    .await?;
                    self.recorder
                        .record(
                            &mut tx,
                            AuditEntry::new(flow.id.clone(), ApprovalAction::MovedToNextStep)
                                .by(user_id.clone())
                                .with_note(format!("advanced to step {next}")),
                            now,
                        )
                        .await?;
                }
                FlowAction::FinalizeApproved | FlowAction::FinalizeRejected => {
                    let (logged, update) = if *action == FlowAction::FinalizeApproved {
                        (
                            ApprovalAction::FlowApproved,
                            RequestStatusUpdate::Approved {
                                approver: user_id.clone(),
                                final_approved_at: now,
                            },
                        )
                    } else {
                        (ApprovalAction::FlowRejected, RequestStatusUpdate::Rejected)
                    };
                    let finalized = SqlApprovalFlowRepository::new(&mut tx)
                        .finalize(&flow.id, flow.current_step, &outcome.to, outcome.current_step, now)
                        .await?;
                    if !finalized {
                        return Err(stale(&flow.id));
                    }

                    self.update_request(&mut tx, &flow.request_id, update).await?;
                    self.recorder
                        .record(
                            &mut tx,
                            AuditEntry::new(flow.id.clone(), logged)
                                .by(user_id.clone())
                                .with_note(note),
                            now,
                        )
                        .await?;
                }
                FlowAction::ActivateStep(_) => {
                    return Err(WorkflowError::invalid_state(format!(
                        "flow `{}` cannot be re-activated by a decision",
                        flow.id
                    )));
                }
            }
        }

        tx.commit().await.map_err(RepositoryError::from)?;

        match outcome.to {
            FlowStatus::Approved => info!(
                event_name = "workflow.flow.approved",
                flow_id = %flow.id,
                request_id = %flow.request_id,
                user_id = %user_id,
                "approval flow approved"
            ),
            FlowStatus::Rejected => info!(
                event_name = "workflow.flow.rejected",
                flow_id = %flow.id,
                request_id = %flow.request_id,
                user_id = %user_id,
                step_number = step.step_number,
                "approval flow rejected"
            ),
            _ => info!(
                event_name = "workflow.step.approved",
                flow_id = %flow.id,
                user_id = %user_id,
                step_number = step.step_number,
                next_step = outcome.current_step,
                "approval step approved"
            ),
        }

        Ok(DecisionReceipt {
            flow_id: flow.id,
            request_id: flow.request_id,
            decision,
            step_number: step.step_number,
            flow_status: outcome.to,
            current_step: outcome.current_step,
        })
    }

    async fn authorize(
        &self,
        conn: &mut SqliteConnection,
        step: &ApprovalStep,
        user_id: &UserId,
        decision: Decision,
    ) -> Result<(), WorkflowError> {
        let allowed = match self.authorizer.can_act(step, user_id) {
            StepAuthorization::DirectMatch => true,
            StepAuthorization::GroupCheckRequired(group_name) => {
                self.membership.is_member(conn, user_id, &group_name).await?
            }
            StepAuthorization::Denied => false,
        };

        if allowed {
            return Ok(());
        }

        warn!(
            event_name = "workflow.decision.denied",
            flow_id = %step.flow_id,
            user_id = %user_id,
            step_number = step.step_number,
            decision = decision.as_str(),
            "user is not entitled to act on the current step"
        );
        Err(WorkflowError::Unauthorized { user_id: user_id.0.clone(), step_number: step.step_number })
    }

    async fn update_request(
        &self,
        conn: &mut SqliteConnection,
        request_id: &RequestId,
        update: RequestStatusUpdate,
    ) -> Result<(), WorkflowError> {
        let applied =
            SqlOpsRequestRepository::new(conn).apply_status_update(request_id, &update, Utc::now()).await?;
        if applied {
            Ok(())
        } else {
            Err(WorkflowError::invalid_state(format!(
                "request `{request_id}` is no longer open for review"
            )))
        }
    }
}

fn stale(flow_id: &FlowId) -> WorkflowError {
    WorkflowError::invalid_state(format!("flow `{flow_id}` was modified by a concurrent decision"))
}
