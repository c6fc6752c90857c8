use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalStep, Approver};
use crate::domain::request::UserId;

/// Result of checking a user against a step without any I/O.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "group", rename_all = "snake_case")]
pub enum StepAuthorization {
    /// The step names this user directly.
    DirectMatch,
    /// The step is assigned to a group; the caller must resolve membership before acting.
    GroupCheckRequired(String),
    Denied,
}

impl StepAuthorization {
    pub fn is_direct_match(&self) -> bool {
        matches!(self, Self::DirectMatch)
    }
}

#[derive(Clone, Debug, Default)]
pub struct StepAuthorizer;

impl StepAuthorizer {
    pub fn new() -> Self {
        Self
    }

    pub fn can_act(&self, step: &ApprovalStep, user_id: &UserId) -> StepAuthorization {
        match &step.approver {
            Approver::User(assigned) if assigned == user_id => StepAuthorization::DirectMatch,
            Approver::User(_) => StepAuthorization::Denied,
            Approver::Group(group_name) => {
                StepAuthorization::GroupCheckRequired(group_name.clone())
            }
        }
    }
}
