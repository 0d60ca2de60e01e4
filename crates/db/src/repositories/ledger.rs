use async_trait::async_trait;
use rust_decimal::Decimal;

use expenso_core::collaborators::LedgerService;
use expenso_core::domain::report::{ExpenseReport, ExpenseStatus};
use expenso_core::domain::{CompanyId, CostCentreId, ProjectId, ReportId};
use expenso_core::errors::CollaboratorError;

use super::{decode_column, decode_decimal, RepositoryError};
use crate::DbPool;

/// Statuses whose totals count as committed spend against a budget.
const COMMITTED_STATUSES: &str = "'SUBMITTED', 'PENDING_APPROVAL_L1', 'PENDING_APPROVAL_L2', \
     'PENDING_APPROVAL_L3', 'PENDING_APPROVAL_L4', 'PENDING_APPROVAL_L5', 'APPROVED'";

/// Ledger figures derived from stored reports and expense lines.
pub struct SqlLedger {
    pool: DbPool,
}

impl SqlLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn live_line_total(&self, report_id: &ReportId) -> Result<Decimal, RepositoryError> {
        let rows = sqlx::query("SELECT amount, status FROM expense_line WHERE report_id = ?")
            .bind(&report_id.0)
            .fetch_all(&self.pool)
            .await?;

        let mut total = Decimal::ZERO;
        for row in &rows {
            let status: String = decode_column(row, "status")?;
            if status == ExpenseStatus::Rejected.as_str() {
                continue;
            }
            let amount: String = decode_column(row, "amount")?;
            total += decode_decimal("expense_line.amount", &amount)?;
        }
        Ok(total)
    }

    async fn committed_spend(
        &self,
        company_id: &CompanyId,
        column: &'static str,
        value: &str,
        exclude: &ReportId,
    ) -> Result<Decimal, RepositoryError> {
        let sql = format!(
            "SELECT total_amount FROM expense_report
             WHERE company_id = ? AND {column} = ? AND id <> ? AND status IN ({COMMITTED_STATUSES})"
        );
        let totals: Vec<String> = sqlx::query_scalar(&sql)
            .bind(&company_id.0)
            .bind(value)
            .bind(&exclude.0)
            .fetch_all(&self.pool)
            .await?;

        totals.iter().try_fold(Decimal::ZERO, |sum, raw| -> Result<Decimal, RepositoryError> {
            Ok(sum + decode_decimal("expense_report.total_amount", raw)?)
        })
    }
}

#[async_trait]
impl LedgerService for SqlLedger {
    async fn report_total(&self, report: &ExpenseReport) -> Result<Decimal, CollaboratorError> {
        Ok(self.live_line_total(&report.id).await?)
    }

    async fn project_spend(
        &self,
        company_id: &CompanyId,
        project_id: &ProjectId,
        exclude: &ReportId,
    ) -> Result<Decimal, CollaboratorError> {
        Ok(self.committed_spend(company_id, "project_id", project_id.as_str(), exclude).await?)
    }

    async fn cost_centre_spend(
        &self,
        company_id: &CompanyId,
        cost_centre_id: &CostCentreId,
        exclude: &ReportId,
    ) -> Result<Decimal, CollaboratorError> {
        Ok(self
            .committed_spend(company_id, "cost_centre_id", cost_centre_id.as_str(), exclude)
            .await?)
    }
}
