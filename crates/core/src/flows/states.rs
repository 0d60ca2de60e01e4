use serde::{Deserialize, Serialize};

use crate::approvals::AutoApprovalReason;
use crate::domain::company::RoleRef;
use crate::domain::report::{ExpenseStatus, ReportStatus};
use crate::domain::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportAction {
    Submit,
    Approve,
    Reject,
    RequestChanges,
}

impl ReportAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::RequestChanges => "request_changes",
        }
    }
}

/// Actions an approver can take on the pending level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    RequestChanges,
}

impl Decision {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "request_changes" => Some(Self::RequestChanges),
            _ => None,
        }
    }
}

impl From<Decision> for ReportAction {
    fn from(value: Decision) -> Self {
        match value {
            Decision::Approve => Self::Approve,
            Decision::Reject => Self::Reject,
            Decision::RequestChanges => Self::RequestChanges,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub roles: Vec<RoleRef>,
}

impl Actor {
    pub fn new(id: UserId, roles: Vec<RoleRef>) -> Self {
        Self { id, roles }
    }
}

/// Outcome of the guard: who may act, and whether a privileged override was used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorization {
    pub actor_id: UserId,
    pub action: ReportAction,
    pub override_role: Option<RoleRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionEffect {
    ChainBuilt { levels: usize },
    AutoApproved(AutoApprovalReason),
    CascadeExpenses { to: ExpenseStatus, moved: usize },
    NotifyApprover(UserId),
    NotifyOwner(UserId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ReportStatus,
    pub to: ReportStatus,
    pub action: ReportAction,
    pub effects: Vec<TransitionEffect>,
}
