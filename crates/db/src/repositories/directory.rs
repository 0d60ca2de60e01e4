use async_trait::async_trait;

use expenso_core::collaborators::IdentityDirectory;
use expenso_core::domain::company::{
    ApprovalLevel, ApproverMapping, EmployeeApprovalProfile, LevelAssignment, RoleRef,
};
use expenso_core::domain::{CompanyId, UserId};
use expenso_core::errors::CollaboratorError;

use super::{decode_column, RepositoryError};
use crate::DbPool;

pub struct SqlIdentityDirectory {
    pool: DbPool,
}

impl SqlIdentityDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_user(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
        manager_id: Option<&UserId>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO company_user (company_id, user_id, manager_id) VALUES (?, ?, ?)
             ON CONFLICT(company_id, user_id) DO UPDATE SET manager_id = excluded.manager_id",
        )
        .bind(&company_id.0)
        .bind(&user_id.0)
        .bind(manager_id.map(|id| id.0.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn grant_role(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
        role: &RoleRef,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_role (company_id, user_id, role) VALUES (?, ?, ?)
             ON CONFLICT(company_id, user_id, role) DO NOTHING",
        )
        .bind(&company_id.0)
        .bind(&user_id.0)
        .bind(role.label())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn put_profile(
        &self,
        company_id: &CompanyId,
        profile: &EmployeeApprovalProfile,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO employee_approval_profile (company_id, employee_id, active, approvers_json)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(company_id, employee_id) DO UPDATE SET
                 active = excluded.active,
                 approvers_json = excluded.approvers_json",
        )
        .bind(&company_id.0)
        .bind(&profile.employee_id.0)
        .bind(profile.active)
        .bind(serde_json::to_string(&profile.approvers)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replaces every mapped level for the employee.
    pub async fn put_mapping(
        &self,
        company_id: &CompanyId,
        mapping: &ApproverMapping,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM approver_mapping WHERE company_id = ? AND employee_id = ?")
            .bind(&company_id.0)
            .bind(&mapping.employee_id.0)
            .execute(&mut *tx)
            .await?;

        for assignment in &mapping.levels {
            sqlx::query(
                "INSERT INTO approver_mapping (company_id, employee_id, level, approver_id)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&company_id.0)
            .bind(&mapping.employee_id.0)
            .bind(i64::from(assignment.level.get()))
            .bind(&assignment.approver_id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn holders(
        &self,
        company_id: &CompanyId,
        role: &RoleRef,
    ) -> Result<Vec<UserId>, RepositoryError> {
        let users: Vec<String> = sqlx::query_scalar(
            "SELECT user_id FROM user_role WHERE company_id = ? AND role = ? ORDER BY user_id ASC",
        )
        .bind(&company_id.0)
        .bind(role.label())
        .fetch_all(&self.pool)
        .await?;
        Ok(users.into_iter().map(UserId).collect())
    }

    async fn manager(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<UserId>, RepositoryError> {
        let manager: Option<Option<String>> = sqlx::query_scalar(
            "SELECT manager_id FROM company_user WHERE company_id = ? AND user_id = ?",
        )
        .bind(&company_id.0)
        .bind(&employee_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(manager.flatten().map(UserId))
    }

    async fn roles(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
    ) -> Result<Vec<RoleRef>, RepositoryError> {
        let labels: Vec<String> = sqlx::query_scalar(
            "SELECT role FROM user_role WHERE company_id = ? AND user_id = ? ORDER BY role ASC",
        )
        .bind(&company_id.0)
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        labels
            .into_iter()
            .map(|label| {
                RoleRef::parse_label(&label)
                    .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{label}`")))
            })
            .collect()
    }

    async fn profile(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<EmployeeApprovalProfile>, RepositoryError> {
        let row = sqlx::query(
            "SELECT active, approvers_json FROM employee_approval_profile
             WHERE company_id = ? AND employee_id = ?",
        )
        .bind(&company_id.0)
        .bind(&employee_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let active: bool = decode_column(&row, "active")?;
        let approvers_json: String = decode_column(&row, "approvers_json")?;
        let approvers: Vec<LevelAssignment> = serde_json::from_str(&approvers_json)?;

        Ok(Some(EmployeeApprovalProfile { employee_id: employee_id.clone(), active, approvers }))
    }

    async fn mapping(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<ApproverMapping>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT level, approver_id FROM approver_mapping
             WHERE company_id = ? AND employee_id = ? ORDER BY level ASC",
        )
        .bind(&company_id.0)
        .bind(&employee_id.0)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let levels = rows
            .iter()
            .map(|row| {
                let level: i64 = decode_column(row, "level")?;
                let approver_id: String = decode_column(row, "approver_id")?;
                let level = u8::try_from(level).ok().and_then(ApprovalLevel::new).ok_or_else(
                    || RepositoryError::Decode(format!("invalid mapped level {level}")),
                )?;
                Ok(LevelAssignment { level, approver_id: UserId(approver_id) })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(Some(ApproverMapping { employee_id: employee_id.clone(), levels }))
    }
}

#[async_trait]
impl IdentityDirectory for SqlIdentityDirectory {
    async fn users_with_role(
        &self,
        company_id: &CompanyId,
        role: &RoleRef,
    ) -> Result<Vec<UserId>, CollaboratorError> {
        Ok(self.holders(company_id, role).await?)
    }

    async fn manager_of(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<UserId>, CollaboratorError> {
        Ok(self.manager(company_id, employee_id).await?)
    }

    async fn roles_of(
        &self,
        company_id: &CompanyId,
        user_id: &UserId,
    ) -> Result<Vec<RoleRef>, CollaboratorError> {
        Ok(self.roles(company_id, user_id).await?)
    }

    async fn approval_profile(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<EmployeeApprovalProfile>, CollaboratorError> {
        Ok(self.profile(company_id, employee_id).await?)
    }

    async fn approver_mapping(
        &self,
        company_id: &CompanyId,
        employee_id: &UserId,
    ) -> Result<Option<ApproverMapping>, CollaboratorError> {
        Ok(self.mapping(company_id, employee_id).await?)
    }
}
