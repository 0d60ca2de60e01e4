pub mod approvals;
pub mod audit;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod memory;
pub mod processor;

pub use approvals::{
    ApprovalChainBuilder, ApprovalConfigurationStore, ApproverResolver, BuiltChain,
    ConfigurationSnapshot, EmptyChainPolicy, ReportSnapshot, Resolution,
};
pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use collaborators::{
    CompanyConfigurationService, IdentityDirectory, LedgerService, Notification,
    NotificationDispatcher, ReportRepository, SaveOutcome,
};
pub use domain::company::{ApprovalLevel, ApprovalMatrix, RoleRef, SystemRole};
pub use domain::report::{ExpenseReport, ReportStatus};
pub use domain::{CompanyId, ReportId, UserId};
pub use errors::{ApprovalError, CollaboratorError, ConfigurationError, InterfaceError};
pub use flows::{Decision, ReportStateMachine, TransitionOutcome};
pub use processor::{ActionProcessor, ActionResult, Collaborators};
