use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalLog, ApprovalLogId, FlowId, StepId};
use crate::domain::request::UserId;

/// Vocabulary of the append-only approval trail. The string forms are persisted and must not
/// change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    FlowStarted,
    StepApproved,
    StepRejected,
    MovedToNextStep,
    FlowApproved,
    FlowRejected,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlowStarted => "flow_started",
            Self::StepApproved => "step_approved",
            Self::StepRejected => "step_rejected",
            Self::MovedToNextStep => "moved_to_next_step",
            Self::FlowApproved => "flow_approved",
            Self::FlowRejected => "flow_rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flow_started" => Some(Self::FlowStarted),
            "step_approved" => Some(Self::StepApproved),
            "step_rejected" => Some(Self::StepRejected),
            "moved_to_next_step" => Some(Self::MovedToNextStep),
            "flow_approved" => Some(Self::FlowApproved),
            "flow_rejected" => Some(Self::FlowRejected),
            _ => None,
        }
    }
}

/// An audit entry about to be appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub flow_id: FlowId,
    pub step_id: Option<StepId>,
    pub action: ApprovalAction,
    pub by_user_id: Option<UserId>,
    pub note: String,
}

impl AuditEntry {
    pub fn new(flow_id: FlowId, action: ApprovalAction) -> Self {
        Self { flow_id, step_id: None, action, by_user_id: None, note: String::new() }
    }

    pub fn with_step(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }

    pub fn by(mut self, user_id: UserId) -> Self {
        self.by_user_id = Some(user_id);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn into_log(self, created_at: DateTime<Utc>) -> ApprovalLog {
        ApprovalLog {
            id: ApprovalLogId::generate(),
            flow_id: self.flow_id,
            step_id: self.step_id,
            action: self.action.as_str().to_owned(),
            by_user_id: self.by_user_id,
            note: self.note,
            created_at,
        }
    }
}
