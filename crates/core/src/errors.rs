use thiserror::Error;

use crate::domain::company::ApprovalLevel;
use crate::domain::report::ReportStatus;
use crate::domain::{ReportId, UserId};
use crate::flows::ReportAction;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("approver for level {level} is ambiguous: `{role}` is held by {candidates:?}")]
    AmbiguousApprover { level: ApprovalLevel, role: String, candidates: Vec<UserId> },
    #[error("mandatory level {level} has no resolvable approver")]
    MandatoryLevelUnresolved { level: ApprovalLevel },
    #[error("no approvable levels remain and auto-approval of empty chains is disabled")]
    NoApprovableLevels,
    #[error("approval matrix is invalid: {0}")]
    MatrixInvariant(String),
}

impl ConfigurationError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::AmbiguousApprover { .. } => "AMBIGUOUS_APPROVER",
            Self::MandatoryLevelUnresolved { .. } => "MANDATORY_LEVEL_UNRESOLVED",
            Self::NoApprovableLevels => "NO_APPROVABLE_LEVELS",
            Self::MatrixInvariant(_) => "MATRIX_INVARIANT",
        }
    }
}

/// Failure reported by an external collaborator (store, directory, ledger,
/// audit log or notification transport).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("actor `{actor_id}` may not {action:?} this report")]
    AccessDenied { actor_id: UserId, action: ReportAction },
    #[error("cannot {action:?} a report in state {}", .status.as_str())]
    InvalidState { status: ReportStatus, action: ReportAction },
    #[error("report {report_id} changed since version {expected_version}; reload and retry")]
    StaleState { report_id: ReportId, expected_version: u64 },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("report {0} was not found")]
    ReportNotFound(ReportId),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl ApprovalError {
    /// Stable client-facing category.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::StaleState { .. } => "STALE_STATE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ReportNotFound(_) => "NOT_FOUND",
            Self::Domain(_) => "INTERNAL_ERROR",
            Self::Collaborator(_) => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let code = self.code();
        let message = self.to_string();
        match self {
            Self::Configuration(_) => {
                InterfaceError::UnprocessableConfiguration { code, message, correlation_id }
            }
            Self::Validation(_) => InterfaceError::BadRequest { code, message, correlation_id },
            Self::AccessDenied { .. } => InterfaceError::Forbidden { code, message, correlation_id },
            Self::InvalidState { .. } | Self::StaleState { .. } => {
                InterfaceError::Conflict { code, message, correlation_id }
            }
            Self::ReportNotFound(_) => InterfaceError::NotFound { code, message, correlation_id },
            Self::Collaborator(_) => {
                InterfaceError::ServiceUnavailable { code, message, correlation_id }
            }
            Self::Domain(_) => InterfaceError::Internal { code, message, correlation_id },
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { code: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String, correlation_id: String },
    #[error("configuration error: {message}")]
    UnprocessableConfiguration { code: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { code: &'static str, message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { code: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. }
            | Self::Forbidden { code, .. }
            | Self::NotFound { code, .. }
            | Self::Conflict { code, .. }
            | Self::UnprocessableConfiguration { code, .. }
            | Self::ServiceUnavailable { code, .. }
            | Self::Internal { code, .. } => *code,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::UnprocessableConfiguration { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::UnprocessableConfiguration { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not the approver for the current level.",
            Self::NotFound { .. } => "The expense report could not be found.",
            Self::Conflict { code: "STALE_STATE", .. } => {
                "The report changed while you were viewing it. Reload and try again."
            }
            Self::Conflict { .. } => "This action is not available for the report's current state.",
            Self::UnprocessableConfiguration { .. } => {
                "The company's approval configuration needs attention from an administrator."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}
