use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::company::ApprovalLevel;
use crate::domain::{CompanyId, CostCentreId, ExpenseId, ProjectId, ReportId, RuleId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Draft,
    Submitted,
    PendingApprovalL1,
    PendingApprovalL2,
    PendingApprovalL3,
    PendingApprovalL4,
    PendingApprovalL5,
    ChangesRequested,
    Approved,
    Rejected,
}

impl ReportStatus {
    pub fn pending(level: ApprovalLevel) -> Self {
        match level.get() {
            1 => Self::PendingApprovalL1,
            2 => Self::PendingApprovalL2,
            3 => Self::PendingApprovalL3,
            4 => Self::PendingApprovalL4,
            _ => Self::PendingApprovalL5,
        }
    }

    pub fn pending_level(&self) -> Option<ApprovalLevel> {
        let level = match self {
            Self::PendingApprovalL1 => 1,
            Self::PendingApprovalL2 => 2,
            Self::PendingApprovalL3 => 3,
            Self::PendingApprovalL4 => 4,
            Self::PendingApprovalL5 => 5,
            _ => return None,
        };
        ApprovalLevel::new(level)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::PendingApprovalL1 => "PENDING_APPROVAL_L1",
            Self::PendingApprovalL2 => "PENDING_APPROVAL_L2",
            Self::PendingApprovalL3 => "PENDING_APPROVAL_L3",
            Self::PendingApprovalL4 => "PENDING_APPROVAL_L4",
            Self::PendingApprovalL5 => "PENDING_APPROVAL_L5",
            Self::ChangesRequested => "CHANGES_REQUESTED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(Self::Draft),
            "SUBMITTED" => Some(Self::Submitted),
            "PENDING_APPROVAL_L1" => Some(Self::PendingApprovalL1),
            "PENDING_APPROVAL_L2" => Some(Self::PendingApprovalL2),
            "PENDING_APPROVAL_L3" => Some(Self::PendingApprovalL3),
            "PENDING_APPROVAL_L4" => Some(Self::PendingApprovalL4),
            "PENDING_APPROVAL_L5" => Some(Self::PendingApprovalL5),
            "CHANGES_REQUESTED" => Some(Self::ChangesRequested),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    NotStarted,
    Pending,
    Approved,
    Rejected,
    Skipped,
}

/// Which precedence tier produced a chain entry's approver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApproverSource {
    ManualProfile,
    ApproverMapping,
    ApprovalRule { rule_id: RuleId },
    Matrix,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverEntry {
    pub level: ApprovalLevel,
    pub approver_id: UserId,
    pub approver_role: String,
    pub source: ApproverSource,
    pub status: EntryStatus,
    pub action_at: Option<DateTime<Utc>>,
    /// Set only when a privileged override actor acted instead of `approver_id`.
    #[serde(default)]
    pub acted_by: Option<UserId>,
    pub comment: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    ChangesRequested,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::ChangesRequested => "CHANGES_REQUESTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(Self::Draft),
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "CHANGES_REQUESTED" => Some(Self::ChangesRequested),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseLine {
    pub id: ExpenseId,
    pub description: String,
    pub amount: Decimal,
    pub status: ExpenseStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn zero(currency: impl Into<String>) -> Self {
        Self { amount: Decimal::ZERO, currency: currency.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseReport {
    pub id: ReportId,
    pub owner_id: UserId,
    pub company_id: CompanyId,
    pub status: ReportStatus,
    pub total: Money,
    pub project_id: Option<ProjectId>,
    pub cost_centre_id: Option<CostCentreId>,
    pub expenses: Vec<ExpenseLine>,
    pub approvers: Vec<ApproverEntry>,
    #[serde(default)]
    pub annotations: Vec<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExpenseReport {
    pub fn draft(
        id: ReportId,
        owner_id: UserId,
        company_id: CompanyId,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id,
            company_id,
            status: ReportStatus::Draft,
            total: Money::zero(currency),
            project_id: None,
            cost_centre_id: None,
            expenses: Vec::new(),
            approvers: Vec::new(),
            annotations: Vec::new(),
            submitted_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pending_index(&self) -> Option<usize> {
        self.approvers.iter().position(|entry| entry.status == EntryStatus::Pending)
    }

    pub fn pending_entry(&self) -> Option<&ApproverEntry> {
        self.pending_index().map(|index| &self.approvers[index])
    }

    /// Moves every expense line currently in one of `from` to `to`.
    pub fn cascade_expenses(&mut self, from: &[ExpenseStatus], to: ExpenseStatus) -> usize {
        let mut moved = 0;
        for line in self.expenses.iter_mut().filter(|line| from.contains(&line.status)) {
            line.status = to;
            moved += 1;
        }
        moved
    }

    /// Checks the chain shape against the report status: at most one PENDING
    /// entry, APPROVED/SKIPPED before it, NOT_STARTED (or build-time SKIPPED)
    /// after it, and a status that names the pending level.
    pub fn verify_chain(&self) -> Result<(), DomainError> {
        let pending: Vec<usize> = self
            .approvers
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.status == EntryStatus::Pending)
            .map(|(index, _)| index)
            .collect();

        if pending.len() > 1 {
            return Err(DomainError::InvariantViolation(format!(
                "report {} has {} pending approver entries",
                self.id,
                pending.len()
            )));
        }

        if let Some(&index) = pending.first() {
            let before_ok = self.approvers[..index]
                .iter()
                .all(|entry| matches!(entry.status, EntryStatus::Approved | EntryStatus::Skipped));
            // SKIPPED is decided when the chain is built, so it may follow the pending entry.
            let after_ok = self.approvers[index + 1..]
                .iter()
                .all(|entry| matches!(entry.status, EntryStatus::NotStarted | EntryStatus::Skipped));
            if !before_ok || !after_ok {
                return Err(DomainError::InvariantViolation(format!(
                    "report {} chain is out of order around level {}",
                    self.id, self.approvers[index].level
                )));
            }

            let expected = ReportStatus::pending(self.approvers[index].level);
            if self.status != expected {
                return Err(DomainError::InvariantViolation(format!(
                    "report {} is {} but its pending entry is at level {}",
                    self.id,
                    self.status.as_str(),
                    self.approvers[index].level
                )));
            }
        } else if self.status.pending_level().is_some() {
            return Err(DomainError::InvariantViolation(format!(
                "report {} is {} without a pending approver entry",
                self.id,
                self.status.as_str()
            )));
        }

        Ok(())
    }
}
