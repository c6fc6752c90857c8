use chrono::Utc;
use tracing::info;

use opsflow_core::approvals::ConfigResolver;
use opsflow_core::audit::{ApprovalAction, AuditEntry};
use opsflow_core::domain::approval::{ApprovalFlow, ApprovalStep, FlowId, FlowView};
use opsflow_core::domain::request::{RequestId, RequestStatusUpdate, UserId};
use opsflow_core::errors::WorkflowError;
use opsflow_core::flows::{ApprovalFlowMachine, FlowAction, FlowContext, FlowEvent};

use super::audit::AuditRecorder;
use crate::repositories::{
    RepositoryError, SqlApprovalFlowRepository, SqlApprovalStepRepository,
    SqlApproverConfigRepository, SqlOpsRequestRepository,
};
use crate::{begin_write, DbPool};

/// Creates the flow and its step snapshot for a request. Everything happens in one
/// transaction; on any error nothing is written.
#[derive(Clone, Debug)]
pub struct FlowOrchestrator {
    pool: DbPool,
    resolver: ConfigResolver,
    machine: ApprovalFlowMachine,
    recorder: AuditRecorder,
}

impl FlowOrchestrator {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            resolver: ConfigResolver::new(),
            machine: ApprovalFlowMachine::new(),
            recorder: AuditRecorder::new(),
        }
    }

    pub async fn start_flow(
        &self,
        request_id: &RequestId,
        started_by: &UserId,
    ) -> Result<FlowView, WorkflowError> {
        let mut tx = begin_write(&self.pool).await.map_err(RepositoryError::from)?;

        let request = SqlOpsRequestRepository::new(&mut tx)
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("ops request", request_id.0.clone()))?;
        if !request.status.can_start_flow() {
            return Err(WorkflowError::invalid_state(format!(
                "request `{}` is {} and cannot enter approval",
                request.id,
                request.status.as_str()
            )));
        }

        let request_type = SqlOpsRequestRepository::new(&mut tx)
            .find_request_type(&request.request_type_id)
            .await?
            .ok_or_else(|| {
                WorkflowError::Configuration(format!(
                    "request type `{}` does not exist",
                    request.request_type_id.0
                ))
            })?;
        if !request_type.is_active {
            return Err(WorkflowError::Configuration(format!(
                "request type `{}` is inactive",
                request_type.id.0
            )));
        }

        if SqlApprovalFlowRepository::new(&mut tx).find_by_request_id(&request.id).await?.is_some()
        {
            return Err(WorkflowError::invalid_state(format!(
                "an approval flow already exists for request `{}`",
                request.id
            )));
        }

        let configs = SqlApproverConfigRepository::new(&mut tx)
            .list_by_request_type(&request.request_type_id)
            .await?;
        let drafts = self.resolver.build_steps(&configs)?;
        let total_steps = u32::try_from(drafts.len())
            .map_err(|_| WorkflowError::Configuration("approver chain is too long".to_owned()))?;

        let now = Utc::now();
        let mut flow = ApprovalFlow {
            id: FlowId::generate(),
            request_id: request.id.clone(),
            current_step: 1,
            status: self.machine.initial_status(),
            created_by_id: Some(started_by.clone()),
            created_at: now,
            updated_at: now,
        };
        SqlApprovalFlowRepository::new(&mut tx).insert(&flow).await?;

        let steps: Vec<ApprovalStep> =
            drafts.into_iter().map(|draft| draft.attach(&flow.id, now)).collect();
        SqlApprovalStepRepository::new(&mut tx).insert_many(&steps).await?;

        let outcome = self.machine.apply(
            &flow.status,
            &FlowEvent::StepsResolved,
            &FlowContext::new(flow.current_step, total_steps),
        )?;
        for action in &outcome.actions {
            match action {
                FlowAction::ActivateStep(step_number) => {
                    let activated = SqlApprovalFlowRepository::new(&mut tx)
                        .mark_in_review(&flow.id, *step_number, now)
                        .await?;
                    if !activated {
                        return Err(WorkflowError::invalid_state(format!(
                            "flow `{}` changed while it was being started",
                            flow.id
                        )));
                    }

                    let first_approver = steps
                        .iter()
                        .find(|step| step.step_number == *step_number)
                        .and_then(|step| step.approver.user_id().cloned());
                    let hinted = SqlOpsRequestRepository::new(&mut tx)
                        .apply_status_update(
                            &request.id,
                            &RequestStatusUpdate::InReview {
                                level: *step_number,
                                current_approver: first_approver,
                            },
                            now,
                        )
                        .await?;
                    if !hinted {
                        return Err(WorkflowError::invalid_state(format!(
                            "request `{}` was closed while its flow was being started",
                            request.id
                        )));
                    }
                }
                other => {
                    return Err(WorkflowError::invalid_state(format!(
                        "unexpected action {other:?} while starting a flow"
                    )));
                }
            }
        }
        flow.status = outcome.to;
        flow.current_step = outcome.current_step;

        self.recorder
            .record(
                &mut tx,
                AuditEntry::new(flow.id.clone(), ApprovalAction::FlowStarted).by(started_by.clone()),
                now,
            )
            .await?;

        tx.commit().await.map_err(RepositoryError::from)?;

        info!(
            event_name = "workflow.flow.started",
            flow_id = %flow.id,
            request_id = %flow.request_id,
            started_by = %started_by,
            total_steps,
            "approval flow started"
        );

        Ok(FlowView { flow, steps })
    }
}
