pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod workflow;

pub use connection::{begin_write, connect, connect_with_settings, DbPool};
pub use fixtures::{DemoDataset, RequestSeedInfo, SeedResult, VerificationResult};
pub use repositories::RepositoryError;
pub use workflow::{
    ApprovalEngine, ApprovalWorkflow, AuditRecorder, Decision, DecisionProcessor,
    DecisionReceipt, FlowOrchestrator, GroupMembershipResolver,
};
