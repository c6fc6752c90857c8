use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use opsflow_core::errors::WorkflowError;

pub mod approval_flow;
pub mod approval_log;
pub mod approval_step;
pub mod approver_config;
pub mod membership;
pub mod ops_request;

pub use approval_flow::SqlApprovalFlowRepository;
pub use approval_log::SqlApprovalLogRepository;
pub use approval_step::SqlApprovalStepRepository;
pub use approver_config::SqlApproverConfigRepository;
pub use membership::{MembershipLookup, SqlMembershipRepository, UserRecord};
pub use ops_request::SqlOpsRequestRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for WorkflowError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(message) => Self::InvalidState(message),
            other => Self::Storage(other.to_string()),
        }
    }
}

pub(crate) fn decode_error(column: &str, error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(format!("column `{column}`: {error}"))
}

pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| decode_error(column, error))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| parse_timestamp(column, &raw)).transpose()
}

pub(crate) fn to_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|error| decode_error(column, error))
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_unique_violation())
}
