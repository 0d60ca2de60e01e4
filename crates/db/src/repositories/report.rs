use async_trait::async_trait;
use sqlx::{Sqlite, Transaction};

use expenso_core::collaborators::{ReportRepository, SaveOutcome};
use expenso_core::domain::report::{
    ApproverEntry, ExpenseLine, ExpenseReport, ExpenseStatus, Money, ReportStatus,
};
use expenso_core::domain::{CompanyId, CostCentreId, ExpenseId, ProjectId, ReportId, UserId};
use expenso_core::errors::CollaboratorError;

use super::{decode_column, decode_decimal, decode_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlReportRepository {
    pool: DbPool,
}

impl SqlReportRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load(&self, id: &ReportId) -> Result<Option<ExpenseReport>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, company_id, owner_id, status, total_amount, currency, project_id,
                    cost_centre_id, approvers_json, annotations_json, submitted_at, version,
                    created_at, updated_at
             FROM expense_report WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = sqlx::query(
            "SELECT id, description, amount, status
             FROM expense_line WHERE report_id = ? ORDER BY position ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let expenses = lines.iter().map(row_to_line).collect::<Result<Vec<_>, _>>()?;
        row_to_report(&row, expenses).map(Some)
    }

    async fn write_if_version(
        &self,
        report: &ExpenseReport,
        expected_version: u64,
    ) -> Result<SaveOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE expense_report SET
                 status = ?,
                 total_amount = ?,
                 currency = ?,
                 project_id = ?,
                 cost_centre_id = ?,
                 approvers_json = ?,
                 annotations_json = ?,
                 submitted_at = ?,
                 version = ?,
                 updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(report.status.as_str())
        .bind(report.total.amount.to_string())
        .bind(&report.total.currency)
        .bind(report.project_id.as_ref().map(|id| id.0.clone()))
        .bind(report.cost_centre_id.as_ref().map(|id| id.0.clone()))
        .bind(serde_json::to_string(&report.approvers)?)
        .bind(serde_json::to_string(&report.annotations)?)
        .bind(report.submitted_at.map(|dt| dt.to_rfc3339()))
        .bind(encode_version(report.version)?)
        .bind(report.updated_at.to_rfc3339())
        .bind(&report.id.0)
        .bind(encode_version(expected_version)?)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT version FROM expense_report WHERE id = ?")
                    .bind(&report.id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            tracing::debug!(
                event_name = "persistence.report.version_conflict",
                report_id = %report.id,
                expected_version,
                current_version = ?current,
                "conditional report write matched no row"
            );
            return Ok(SaveOutcome::VersionConflict {
                current_version: current.and_then(|version| u64::try_from(version).ok()),
            });
        }

        sqlx::query("DELETE FROM expense_line WHERE report_id = ?")
            .bind(&report.id.0)
            .execute(&mut *tx)
            .await?;
        insert_lines(&mut tx, report).await?;

        tx.commit().await?;
        Ok(SaveOutcome::Saved)
    }

    async fn write_new(&self, report: &ExpenseReport) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO expense_report (id, company_id, owner_id, status, total_amount, currency,
                                         project_id, cost_centre_id, approvers_json,
                                         annotations_json, submitted_at, version, created_at,
                                         updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&report.id.0)
        .bind(&report.company_id.0)
        .bind(&report.owner_id.0)
        .bind(report.status.as_str())
        .bind(report.total.amount.to_string())
        .bind(&report.total.currency)
        .bind(report.project_id.as_ref().map(|id| id.0.clone()))
        .bind(report.cost_centre_id.as_ref().map(|id| id.0.clone()))
        .bind(serde_json::to_string(&report.approvers)?)
        .bind(serde_json::to_string(&report.annotations)?)
        .bind(report.submitted_at.map(|dt| dt.to_rfc3339()))
        .bind(encode_version(report.version)?)
        .bind(report.created_at.to_rfc3339())
        .bind(report.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        insert_lines(&mut tx, report).await?;

        tx.commit().await?;
        Ok(())
    }
}

async fn insert_lines(
    tx: &mut Transaction<'_, Sqlite>,
    report: &ExpenseReport,
) -> Result<(), RepositoryError> {
    for (position, line) in report.expenses.iter().enumerate() {
        sqlx::query(
            "INSERT INTO expense_line (id, report_id, position, description, amount, status)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&line.id.0)
        .bind(&report.id.0)
        .bind(position as i64)
        .bind(&line.description)
        .bind(line.amount.to_string())
        .bind(line.status.as_str())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn encode_version(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("version {version} exceeds storage range")))
}

fn row_to_line(row: &sqlx::sqlite::SqliteRow) -> Result<ExpenseLine, RepositoryError> {
    let id: String = decode_column(row, "id")?;
    let description: String = decode_column(row, "description")?;
    let amount: String = decode_column(row, "amount")?;
    let status: String = decode_column(row, "status")?;

    Ok(ExpenseLine {
        id: ExpenseId(id),
        description,
        amount: decode_decimal("expense_line.amount", &amount)?,
        status: ExpenseStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown expense status `{status}`")))?,
    })
}

fn row_to_report(
    row: &sqlx::sqlite::SqliteRow,
    expenses: Vec<ExpenseLine>,
) -> Result<ExpenseReport, RepositoryError> {
    let id: String = decode_column(row, "id")?;
    let company_id: String = decode_column(row, "company_id")?;
    let owner_id: String = decode_column(row, "owner_id")?;
    let status: String = decode_column(row, "status")?;
    let total_amount: String = decode_column(row, "total_amount")?;
    let currency: String = decode_column(row, "currency")?;
    let project_id: Option<String> = decode_column(row, "project_id")?;
    let cost_centre_id: Option<String> = decode_column(row, "cost_centre_id")?;
    let approvers_json: String = decode_column(row, "approvers_json")?;
    let annotations_json: String = decode_column(row, "annotations_json")?;
    let submitted_at: Option<String> = decode_column(row, "submitted_at")?;
    let version: i64 = decode_column(row, "version")?;
    let created_at: String = decode_column(row, "created_at")?;
    let updated_at: String = decode_column(row, "updated_at")?;

    let approvers: Vec<ApproverEntry> = serde_json::from_str(&approvers_json)?;
    let annotations: Vec<String> = serde_json::from_str(&annotations_json)?;

    Ok(ExpenseReport {
        id: ReportId(id),
        owner_id: UserId(owner_id),
        company_id: CompanyId(company_id),
        status: ReportStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown report status `{status}`")))?,
        total: Money {
            amount: decode_decimal("expense_report.total_amount", &total_amount)?,
            currency,
        },
        project_id: project_id.map(ProjectId),
        cost_centre_id: cost_centre_id.map(CostCentreId),
        expenses,
        approvers,
        annotations,
        submitted_at: submitted_at
            .map(|raw| decode_timestamp("expense_report.submitted_at", &raw))
            .transpose()?,
        version: u64::try_from(version)
            .map_err(|_| RepositoryError::Decode(format!("negative version {version}")))?,
        created_at: decode_timestamp("expense_report.created_at", &created_at)?,
        updated_at: decode_timestamp("expense_report.updated_at", &updated_at)?,
    })
}

#[async_trait]
impl ReportRepository for SqlReportRepository {
    async fn find_by_id(&self, id: &ReportId) -> Result<Option<ExpenseReport>, CollaboratorError> {
        Ok(self.load(id).await?)
    }

    async fn insert(&self, report: ExpenseReport) -> Result<(), CollaboratorError> {
        Ok(self.write_new(&report).await?)
    }

    async fn save_if_version(
        &self,
        report: &ExpenseReport,
        expected_version: u64,
    ) -> Result<SaveOutcome, CollaboratorError> {
        Ok(self.write_if_version(report, expected_version).await?)
    }
}
