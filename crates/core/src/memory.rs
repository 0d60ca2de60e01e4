//! In-memory collaborators used by tests, the CLI route preview and local runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::audit::{AuditEvent, AuditSink};
use crate::collaborators::{
    CompanyConfigurationService, IdentityDirectory, LedgerService, Notification,
    NotificationDispatcher, ReportRepository, SaveOutcome,
};
use crate::domain::company::{
    ApprovalFlowPolicy, ApprovalMatrix, ApprovalRule, ApproverMapping, EmployeeApprovalProfile,
    RoleRef,
};
use crate::domain::report::{ExpenseReport, ExpenseStatus};
use crate::domain::{CompanyId, CostCentreId, ProjectId, ReportId, UserId};
use crate::errors::CollaboratorError;

#[derive(Debug, Default)]
pub struct InMemoryCompanyConfiguration {
    matrices: RwLock<HashMap<CompanyId, ApprovalMatrix>>,
    flows: RwLock<HashMap<CompanyId, ApprovalFlowPolicy>>,
    rules: RwLock<HashMap<CompanyId, Vec<ApprovalRule>>>,
}

impl InMemoryCompanyConfiguration {
    /// Stores `matrix` without validation, standing in for data written
    /// before the monotonic-prefix check existed.
    pub async fn put_matrix(&self, company_id: &CompanyId, matrix: ApprovalMatrix) {
        self.matrices.write().await.insert(company_id.clone(), matrix);
    }

    pub async fn put_flow(&self, company_id: &CompanyId, flow: ApprovalFlowPolicy) {
        self.flows.write().await.insert(company_id.clone(), flow);
    }

    pub async fn put_rules(&self, company_id: &CompanyId, rules: Vec<ApprovalRule>) {
        self.rules.write().await.insert(company_id.clone(), rules);
    }
}

#[async_trait]
impl CompanyConfigurationService for InMemoryCompanyConfiguration {
    async fn approval_matrix(
        &self,
        company_id: &CompanyId,
    ) -> Result<ApprovalMatrix, CollaboratorError> {
        Ok(self.matrices.read().await.get(company_id).cloned().unwrap_or_default())
    }

    async fn approval_flow(
        &self,
        company_id: &CompanyId,
    ) -> Result<ApprovalFlowPolicy, CollaboratorError> {
        Ok(self.flows.read().await.get(company_id).cloned().unwrap_or_default())
    }

    async fn approval_rules(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, CollaboratorError> {
        Ok(self.rules.read().await.get(company_id).cloned().unwrap_or_default())
    }

    async fn save_approval_matrix(
        &self,
        company_id: &CompanyId,
        matrix: ApprovalMatrix,
    ) -> Result<(), CollaboratorError> {
        self.put_matrix(company_id, matrix).await;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    // BTreeMap keeps role holders in user-id order.
    roles: BTreeMap<(CompanyId, UserId), Vec<RoleRef>>,
    managers: HashMap<(CompanyId, UserId), UserId>,
    profiles: HashMap<(CompanyId, UserId), EmployeeApprovalProfile>,
    mappings: HashMap<(CompanyId, UserId), ApproverMapping>,
}

#[derive(Debug, Default)]
pub struct InMemoryIdentityDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryIdentityDirectory {
    pub async fn grant_role(&self, company_id: &CompanyId, user_id: UserId, role: RoleRef) {
        let mut state = self.state.write().await;
        let roles = state.roles.entry((company_id.clone(), user_id)).or_default();
        if !roles.contains(&role) {
            roles.push(role);
        }
    }

    pub async fn set_manager(&self, company_id: &CompanyId, employee_id: UserId, manager: UserId) {
        self.state.write().await.managers.insert((company_id.clone(), employee_id), manager);
    }

    pub async fn put_profile(&self, company_id: &CompanyId, profile: EmployeeApprovalProfile) {
        self.state
            .write()
            .await
            .profiles
            .insert((company_id.clone(), profile.employee_id.clone()), profile);
    }

    pub async fn put_mapping(&self, company_id: &CompanyId, mapping: ApproverMapping) {
        self.state
            .write()
            .await
            .mappings
            .insert((company_id.clone(), mapping.employee_id.clone()), mapping);
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn users_with_role(
        &self,
        company_id: &CompanyId,
        role: &RoleRef,
    ) -> Result<Vec<UserId>, CollaboratorError> {
        let state = self.state.read().await;
        Ok(state
            .roles
            .iter()
            .filter(|((company, _), roles)| company == company_id && roles.contains(role))
            .map(|((_, user), _)| user.clone())
            .collect())
    }

    async fn manager_of(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<UserId>, CollaboratorError> {
        let key = (company_id.clone(), employee_id.clone());
        Ok(self.state.read().await.managers.get(&key).cloned())
    }

    async fn roles_of(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
    ) -> Result<Vec<RoleRef>, CollaboratorError> {
        let key = (company_id.clone(), user_id.clone());
        Ok(self.state.read().await.roles.get(&key).cloned().unwrap_or_default())
    }

    async fn approval_profile(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<EmployeeApprovalProfile>, CollaboratorError> {
        let key = (company_id.clone(), employee_id.clone());
        Ok(self.state.read().await.profiles.get(&key).cloned())
    }

    async fn approver_mapping(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<ApproverMapping>, CollaboratorError> {
        let key = (company_id.clone(), employee_id.clone());
        Ok(self.state.read().await.mappings.get(&key).cloned())
    }
}

/// Ledger fed with fixed spend figures. Report totals are the sum of lines
/// that were not rejected.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    project_spend: RwLock<HashMap<(CompanyId, ProjectId), Decimal>>,
    cost_centre_spend: RwLock<HashMap<(CompanyId, CostCentreId), Decimal>>,
}

impl InMemoryLedger {
    pub async fn set_project_spend(
        &self,
        company_id: &CompanyId,
        project_id: ProjectId,
        amount: Decimal,
    ) {
        self.project_spend.write().await.insert((company_id.clone(), project_id), amount);
    }

    pub async fn set_cost_centre_spend(
        &self,
        company_id: &CompanyId,
        cost_centre_id: CostCentreId,
        amount: Decimal,
    ) {
        self.cost_centre_spend.write().await.insert((company_id.clone(), cost_centre_id), amount);
    }
}

#[async_trait]
impl LedgerService for InMemoryLedger {
    async fn report_total(&self, report: &ExpenseReport) -> Result<Decimal, CollaboratorError> {
        Ok(report
            .expenses
            .iter()
            .filter(|line| line.status != ExpenseStatus::Rejected)
            .map(|line| line.amount)
            .sum())
    }

    async fn project_spend(
        &self,
        company_id: &CompanyId,
        project_id: &ProjectId,
        _exclude: &ReportId,
    ) -> Result<Decimal, CollaboratorError> {
        let key = (company_id.clone(), project_id.clone());
        Ok(self.project_spend.read().await.get(&key).copied().unwrap_or(Decimal::ZERO))
    }

    async fn cost_centre_spend(
        &self,
        company_id: &CompanyId,
        cost_centre_id: &CostCentreId,
        _exclude: &ReportId,
    ) -> Result<Decimal, CollaboratorError> {
        let key = (company_id.clone(), cost_centre_id.clone());
        Ok(self.cost_centre_spend.read().await.get(&key).copied().unwrap_or(Decimal::ZERO))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryReportRepository {
    reports: RwLock<HashMap<ReportId, ExpenseReport>>,
}

#[async_trait]
impl ReportRepository for InMemoryReportRepository {
    async fn find_by_id(&self, id: &ReportId) -> Result<Option<ExpenseReport>, CollaboratorError> {
        Ok(self.reports.read().await.get(id).cloned())
    }

    async fn insert(&self, report: ExpenseReport) -> Result<(), CollaboratorError> {
        let mut reports = self.reports.write().await;
        if reports.contains_key(&report.id) {
            return Err(CollaboratorError::Persistence(format!(
                "report {} already exists",
                report.id
            )));
        }
        reports.insert(report.id.clone(), report);
        Ok(())
    }

    async fn save_if_version(
        &self,
        report: &ExpenseReport,
        expected_version: u64,
    ) -> Result<SaveOutcome, CollaboratorError> {
        let mut reports = self.reports.write().await;
        let current_version = reports.get(&report.id).map(|stored| stored.version);
        if current_version != Some(expected_version) {
            return Ok(SaveOutcome::VersionConflict { current_version });
        }
        reports.insert(report.id.clone(), report.clone());
        Ok(SaveOutcome::Saved)
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotificationDispatcher {
    notifications: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotificationDispatcher {
    /// Dispatcher whose transport is down: every call fails.
    pub fn failing() -> Self {
        Self { notifications: Mutex::new(Vec::new()), fail: true }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        match self.notifications.lock() {
            Ok(notifications) => notifications.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotificationDispatcher {
    async fn notify(&self, notification: Notification) -> Result<(), CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::Integration("notification transport offline".to_owned()));
        }
        match self.notifications.lock() {
            Ok(mut notifications) => notifications.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        Ok(())
    }
}

/// Audit sink whose backing store is unreachable.
#[derive(Clone, Debug, Default)]
pub struct FailingAuditSink;

impl AuditSink for FailingAuditSink {
    fn emit(&self, _event: AuditEvent) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::Persistence("audit store unreachable".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{InMemoryIdentityDirectory, InMemoryLedger, InMemoryReportRepository};
    use crate::collaborators::{IdentityDirectory, LedgerService, ReportRepository, SaveOutcome};
    use crate::domain::company::{RoleRef, SystemRole};
    use crate::domain::report::{ExpenseLine, ExpenseReport, ExpenseStatus};
    use crate::domain::{CompanyId, ExpenseId, ReportId, UserId};

    #[tokio::test]
    async fn role_holders_are_scoped_per_company() {
        let directory = InMemoryIdentityDirectory::default();
        let role = RoleRef::System(SystemRole::Accountant);
        directory.grant_role(&CompanyId::from("acme"), UserId::from("a"), role.clone()).await;
        directory.grant_role(&CompanyId::from("globex"), UserId::from("b"), role.clone()).await;

        let holders =
            directory.users_with_role(&CompanyId::from("acme"), &role).await.expect("holders");
        assert_eq!(holders, vec![UserId::from("a")]);
    }

    #[tokio::test]
    async fn save_if_version_rejects_stale_writes() {
        let repository = InMemoryReportRepository::default();
        let report = ExpenseReport::draft(
            ReportId::from("R-1"),
            UserId::from("emp"),
            CompanyId::from("acme"),
            "INR",
        );
        repository.insert(report.clone()).await.expect("insert");

        let mut next = report.clone();
        next.version = 2;
        assert_eq!(repository.save_if_version(&next, 1).await.expect("save"), SaveOutcome::Saved);
        assert_eq!(
            repository.save_if_version(&next, 1).await.expect("second save"),
            SaveOutcome::VersionConflict { current_version: Some(2) }
        );
        assert!(repository.insert(report).await.is_err());
    }

    #[tokio::test]
    async fn report_total_ignores_rejected_lines() {
        let ledger = InMemoryLedger::default();
        let mut report = ExpenseReport::draft(
            ReportId::from("R-1"),
            UserId::from("emp"),
            CompanyId::from("acme"),
            "INR",
        );
        for (id, amount, status) in [
            ("E-1", 1_200, ExpenseStatus::Draft),
            ("E-2", 800, ExpenseStatus::Rejected),
        ] {
            report.expenses.push(ExpenseLine {
                id: ExpenseId::from(id),
                description: "travel".to_owned(),
                amount: Decimal::new(amount, 0),
                status,
            });
        }

        assert_eq!(ledger.report_total(&report).await.expect("total"), Decimal::new(1_200, 0));
    }
}
