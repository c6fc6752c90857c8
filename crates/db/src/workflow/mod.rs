//! Transactional approval services on top of the repositories.
//!
//! [`FlowOrchestrator`] snapshots the approver chain into a flow, [`DecisionProcessor`] applies
//! approve and reject decisions, and [`ApprovalEngine`] bundles both behind the
//! [`ApprovalWorkflow`] trait together with the read-side queries.

pub mod audit;
pub mod decision;
pub mod membership;
pub mod orchestrator;

use async_trait::async_trait;

use opsflow_core::config::AppConfig;
use opsflow_core::domain::approval::{ApprovalLog, FlowId, FlowView};
use opsflow_core::domain::request::{RequestId, UserId};
use opsflow_core::errors::WorkflowError;

use crate::repositories::{
    RepositoryError, SqlApprovalFlowRepository, SqlApprovalLogRepository,
    SqlApprovalStepRepository,
};
use crate::DbPool;

pub use audit::AuditRecorder;
pub use decision::{Decision, DecisionProcessor, DecisionReceipt};
pub use membership::GroupMembershipResolver;
pub use orchestrator::FlowOrchestrator;

#[async_trait]
pub trait ApprovalWorkflow: Send + Sync {
    async fn start_flow(
        &self,
        request_id: &RequestId,
        started_by: &UserId,
    ) -> Result<FlowView, WorkflowError>;

    async fn approve(
        &self,
        flow_id: &FlowId,
        user_id: &UserId,
        note: &str,
    ) -> Result<DecisionReceipt, WorkflowError>;

    async fn reject(
        &self,
        flow_id: &FlowId,
        user_id: &UserId,
        reason: &str,
    ) -> Result<DecisionReceipt, WorkflowError>;
}

#[derive(Clone, Debug)]
pub struct ApprovalEngine {
    pool: DbPool,
    orchestrator: FlowOrchestrator,
    processor: DecisionProcessor,
}

impl ApprovalEngine {
    pub fn new(pool: DbPool, membership: GroupMembershipResolver) -> Self {
        Self {
            orchestrator: FlowOrchestrator::new(pool.clone()),
            processor: DecisionProcessor::new(pool.clone(), membership),
            pool,
        }
    }

    pub fn from_config(pool: DbPool, config: &AppConfig) -> Self {
        Self::new(pool, GroupMembershipResolver::new(config.workflow.group_fallback))
    }

    pub async fn flow_view(&self, flow_id: &FlowId) -> Result<FlowView, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let flow = SqlApprovalFlowRepository::new(&mut conn)
            .find_by_id(flow_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("approval flow", flow_id.0.clone()))?;
        let steps = SqlApprovalStepRepository::new(&mut conn).list_by_flow(&flow.id).await?;

        Ok(FlowView { flow, steps })
    }

    pub async fn flow_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<FlowView>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        let Some(flow) =
            SqlApprovalFlowRepository::new(&mut conn).find_by_request_id(request_id).await?
        else {
            return Ok(None);
        };
        let steps = SqlApprovalStepRepository::new(&mut conn).list_by_flow(&flow.id).await?;

        Ok(Some(FlowView { flow, steps }))
    }

    pub async fn list_logs(&self, flow_id: &FlowId) -> Result<Vec<ApprovalLog>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        if SqlApprovalFlowRepository::new(&mut conn).find_by_id(flow_id).await?.is_none() {
            return Err(WorkflowError::not_found("approval flow", flow_id.0.clone()));
        }

        Ok(SqlApprovalLogRepository::new(&mut conn).list_by_flow(flow_id).await?)
    }
}

#[async_trait]
impl ApprovalWorkflow for ApprovalEngine {
    async fn start_flow(
        &self,
        request_id: &RequestId,
        started_by: &UserId,
    ) -> Result<FlowView, WorkflowError> {
        self.orchestrator.start_flow(request_id, started_by).await
    }

    async fn approve(
        &self,
        flow_id: &FlowId,
        user_id: &UserId,
        note: &str,
    ) -> Result<DecisionReceipt, WorkflowError> {
        self.processor.approve(flow_id, user_id, note).await
    }

    async fn reject(
        &self,
        flow_id: &FlowId,
        user_id: &UserId,
        reason: &str,
    ) -> Result<DecisionReceipt, WorkflowError> {
        self.processor.reject(flow_id, user_id, reason).await
    }
}
