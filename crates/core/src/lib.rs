pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use approvals::{ConfigResolver, ResolveError, StepAuthorization, StepAuthorizer};
pub use audit::{ApprovalAction, AuditEntry};
pub use domain::approval::{
    ApprovalFlow, ApprovalLog, ApprovalLogId, ApprovalMode, ApprovalStep, Approver,
    ApproverConfig, ApproverConfigId, FlowId, FlowStatus, FlowView, StepDraft, StepId, StepStatus,
};
pub use domain::request::{
    OpsRequest, RequestId, RequestStatus, RequestStatusUpdate, RequestType, RequestTypeId, UserId,
};
pub use errors::{ErrorKind, InterfaceError, WorkflowError};
pub use flows::{ApprovalFlowMachine, FlowAction, FlowContext, FlowEvent, FlowTransitionError};
