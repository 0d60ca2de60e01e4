//! Seams to the systems the approval engine depends on but does not own.
//!
//! Every trait returns [`CollaboratorError`] on transport or storage failure;
//! business outcomes (a missing manager, an empty role) are ordinary values.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::company::{
    ApprovalFlowPolicy, ApprovalMatrix, ApprovalRule, ApproverMapping, EmployeeApprovalProfile,
    RoleRef,
};
use crate::domain::report::{ExpenseReport, ReportStatus};
use crate::domain::{CompanyId, CostCentreId, ProjectId, ReportId, UserId};
use crate::errors::CollaboratorError;

#[async_trait]
pub trait CompanyConfigurationService: Send + Sync {
    async fn approval_matrix(&self, company_id: &CompanyId)
        -> Result<ApprovalMatrix, CollaboratorError>;
    async fn approval_flow(
        &self,
        company_id: &CompanyId,
    ) -> Result<ApprovalFlowPolicy, CollaboratorError>;
    async fn approval_rules(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, CollaboratorError>;
    async fn save_approval_matrix(
        &self,
        company_id: &CompanyId,
        matrix: ApprovalMatrix,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn users_with_role(
        &self,
        company_id: &CompanyId,
        role: &RoleRef,
    ) -> Result<Vec<UserId>, CollaboratorError>;
    async fn manager_of(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<UserId>, CollaboratorError>;
    async fn roles_of(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
    ) -> Result<Vec<RoleRef>, CollaboratorError>;
    async fn approval_profile(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<EmployeeApprovalProfile>, CollaboratorError>;
    async fn approver_mapping(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<ApproverMapping>, CollaboratorError>;
}

#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Recomputed total of the report's live expense lines.
    async fn report_total(&self, report: &ExpenseReport) -> Result<Decimal, CollaboratorError>;
    /// Amount already committed against the project, excluding `exclude`.
    async fn project_spend(
        &self,
        company_id: &CompanyId,
        project_id: &ProjectId,
        exclude: &ReportId,
    ) -> Result<Decimal, CollaboratorError>;
    async fn cost_centre_spend(
        &self,
        company_id: &CompanyId,
        cost_centre_id: &CostCentreId,
        exclude: &ReportId,
    ) -> Result<Decimal, CollaboratorError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    VersionConflict { current_version: Option<u64> },
}

#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn find_by_id(&self, id: &ReportId) -> Result<Option<ExpenseReport>, CollaboratorError>;
    async fn insert(&self, report: ExpenseReport) -> Result<(), CollaboratorError>;
    /// Writes `report` only if the stored version still equals
    /// `expected_version`. `report.version` carries the next version.
    async fn save_if_version(
        &self,
        report: &ExpenseReport,
        expected_version: u64,
    ) -> Result<SaveOutcome, CollaboratorError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    ApprovalRequested { report_id: ReportId, approver_id: UserId, status: ReportStatus },
    ReportDecided { report_id: ReportId, owner_id: UserId, status: ReportStatus },
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError>;
}

/// Dispatcher for deployments without a notification transport.
#[derive(Clone, Debug, Default)]
pub struct NoopNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for NoopNotificationDispatcher {
    async fn notify(&self, _notification: Notification) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
