use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::request::{RequestId, RequestTypeId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApproverConfigId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalLogId(pub String);

impl FlowId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl StepId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ApprovalLogId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How approvers of a multi-approver step combine. Carried from configuration onto each step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalMode {
    #[default]
    And,
    Or,
}

impl ApprovalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            _ => None,
        }
    }
}

/// Who may act on a config row or step. Exactly one of user or group, never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Approver {
    User(UserId),
    Group(String),
}

impl Approver {
    /// Builds an approver from the nullable column pair, rejecting rows with both or neither set.
    pub fn from_columns(user_id: Option<String>, group_name: Option<String>) -> Option<Self> {
        let group_name = group_name.filter(|name| !name.trim().is_empty());
        match (user_id, group_name) {
            (Some(user_id), None) => Some(Self::User(UserId(user_id))),
            (None, Some(group_name)) => Some(Self::Group(group_name)),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::User(user_id) => Some(user_id),
            Self::Group(_) => None,
        }
    }

    pub fn group_name(&self) -> Option<&str> {
        match self {
            Self::User(_) => None,
            Self::Group(group_name) => Some(group_name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverConfig {
    pub id: ApproverConfigId,
    pub request_type_id: RequestTypeId,
    /// Ordinal rank inside the chain, 1 is first.
    pub level: u32,
    pub approver: Approver,
    pub mode: ApprovalMode,
    /// Ordering inside a level, smaller first.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_review" => Some(Self::InReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Pending | Self::InReview)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_actionable()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFlow {
    pub id: FlowId,
    pub request_id: RequestId,
    pub current_step: u32,
    pub status: FlowStatus,
    pub created_by_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A step resolved from configuration at flow start. Steps are snapshots: editing
/// configuration afterwards never changes an in-flight flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub flow_id: FlowId,
    pub step_number: u32,
    pub approver: Approver,
    pub mode: ApprovalMode,
    pub status: StepStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// A step as produced by the resolver, before it is attached to a persisted flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDraft {
    pub step_number: u32,
    pub approver: Approver,
    pub mode: ApprovalMode,
}

impl StepDraft {
    pub fn attach(self, flow_id: &FlowId, created_at: DateTime<Utc>) -> ApprovalStep {
        ApprovalStep {
            id: StepId::generate(),
            flow_id: flow_id.clone(),
            step_number: self.step_number,
            approver: self.approver,
            mode: self.mode,
            status: StepStatus::Pending,
            approved_at: None,
            notes: String::new(),
            created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLog {
    pub id: ApprovalLogId,
    pub flow_id: FlowId,
    pub step_id: Option<StepId>,
    pub action: String,
    pub by_user_id: Option<UserId>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// Read model returned to callers: the flow plus its steps ordered by step number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowView {
    pub flow: ApprovalFlow,
    pub steps: Vec<ApprovalStep>,
}

impl FlowView {
    pub fn current(&self) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| step.step_number == self.flow.current_step)
    }
}
