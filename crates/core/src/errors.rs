use serde::Serialize;
use thiserror::Error;

use crate::flows::FlowTransitionError;

/// Stable category of a workflow failure. Callers map these to transport status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Configuration,
    Unauthorized,
    InvalidState,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Configuration => "configuration",
            Self::Unauthorized => "unauthorized",
            Self::InvalidState => "invalid_state",
            Self::Storage => "storage",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Configuration => 422,
            Self::Unauthorized => 403,
            Self::InvalidState => 409,
            Self::Storage => 503,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("approval configuration error: {0}")]
    Configuration(String),
    #[error("user `{user_id}` is not entitled to act on step {step_number}")]
    Unauthorized { user_id: String, step_number: u32 },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Transition(#[from] FlowTransitionError),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::InvalidState(_) | Self::Transition(_) => ErrorKind::InvalidState,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "The requested approval flow or request does not exist.",
            Self::Forbidden { .. } => "You are not an approver for the current step.",
            Self::Conflict { .. } => {
                "The approval flow has already moved on. Refresh and try again."
            }
            Self::Unprocessable { .. } => {
                "Approvers are not configured for this request type. Contact an administrator."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }
}

impl From<WorkflowError> for InterfaceError {
    fn from(value: WorkflowError) -> Self {
        let correlation_id = "unassigned".to_owned();
        let message = value.to_string();
        match value.kind() {
            ErrorKind::NotFound => Self::NotFound { message, correlation_id },
            ErrorKind::Unauthorized => Self::Forbidden { message, correlation_id },
            ErrorKind::InvalidState => Self::Conflict { message, correlation_id },
            ErrorKind::Configuration => Self::Unprocessable { message, correlation_id },
            ErrorKind::Storage => Self::ServiceUnavailable { message, correlation_id },
        }
    }
}
