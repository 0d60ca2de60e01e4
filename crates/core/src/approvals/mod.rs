pub mod chain;
pub mod resolver;
pub mod store;

pub use chain::{ApprovalChainBuilder, AutoApprovalReason, BuiltChain, EmptyChainPolicy};
pub use resolver::{
    select_rule, ApproverResolver, ReportSnapshot, Resolution, ResolvedApprover,
    MANUAL_APPROVER_LABEL, MAPPED_APPROVER_LABEL,
};
pub use store::{ApprovalConfigurationStore, ConfigurationSnapshot};
