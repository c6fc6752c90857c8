use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestTypeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
    Canceled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_review" => Some(Self::InReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "canceled" | "cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Approved and rejected requests never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn can_start_flow(&self) -> bool {
        matches!(self, Self::Pending | Self::InReview)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestType {
    pub id: RequestTypeId,
    pub name: String,
    pub is_active: bool,
}

/// The operational request whose status the approval engine finalizes. Only the fields the
/// engine reads or writes are modelled here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpsRequest {
    pub id: RequestId,
    pub requester_id: UserId,
    pub request_type_id: RequestTypeId,
    pub amount: Decimal,
    pub description: String,
    pub status: RequestStatus,
    pub approved_by_id: Option<UserId>,
    pub final_approved_at: Option<DateTime<Utc>>,
    pub current_approver_id: Option<UserId>,
    pub current_approval_level: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status change applied to a request by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestStatusUpdate {
    /// Flow started or advanced: the request is under review at `level`, optionally with a
    /// concrete approver hint for display.
    InReview { level: u32, current_approver: Option<UserId> },
    Approved { approver: UserId, final_approved_at: DateTime<Utc> },
    Rejected,
}

impl RequestStatusUpdate {
    pub fn status(&self) -> RequestStatus {
        match self {
            Self::InReview { .. } => RequestStatus::InReview,
            Self::Approved { .. } => RequestStatus::Approved,
            Self::Rejected => RequestStatus::Rejected,
        }
    }
}
