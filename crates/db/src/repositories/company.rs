use async_trait::async_trait;
use chrono::Utc;

use expenso_core::collaborators::CompanyConfigurationService;
use expenso_core::domain::company::{
    ApprovalFlowPolicy, ApprovalLevel, ApprovalMatrix, ApprovalRule, RoleRef, SelfApprovalPolicy,
    TriggerType,
};
use expenso_core::domain::{CompanyId, RuleId, UserId};
use expenso_core::errors::CollaboratorError;

use super::{decode_column, decode_decimal, RepositoryError};
use crate::DbPool;

/// Company approval settings. The matrix and flow policy share one row per
/// company; a company without a row gets the defaults.
pub struct SqlCompanyConfiguration {
    pool: DbPool,
}

impl SqlCompanyConfiguration {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save_flow(
        &self,
        company_id: &CompanyId,
        flow: &ApprovalFlowPolicy,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO company_approval_settings (company_id, self_approval_policy,
                                                    auto_approve_threshold,
                                                    require_business_head_approval, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(company_id) DO UPDATE SET
                 self_approval_policy = excluded.self_approval_policy,
                 auto_approve_threshold = excluded.auto_approve_threshold,
                 require_business_head_approval = excluded.require_business_head_approval,
                 updated_at = excluded.updated_at",
        )
        .bind(&company_id.0)
        .bind(self_approval_as_str(flow.self_approval_policy))
        .bind(flow.auto_approve_threshold.map(|threshold| threshold.to_string()))
        .bind(flow.require_business_head_approval)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn save_rule(&self, rule: &ApprovalRule) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_rule (id, company_id, trigger_type, threshold_value,
                                        approver_role, approver_user_id, level, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 trigger_type = excluded.trigger_type,
                 threshold_value = excluded.threshold_value,
                 approver_role = excluded.approver_role,
                 approver_user_id = excluded.approver_user_id,
                 level = excluded.level,
                 active = excluded.active",
        )
        .bind(&rule.id.0)
        .bind(&rule.company_id.0)
        .bind(rule.trigger_type.as_str())
        .bind(rule.threshold_value.to_string())
        .bind(rule.approver_role.label())
        .bind(rule.approver_user_id.as_ref().map(|id| id.0.clone()))
        .bind(i64::from(rule.level.get()))
        .bind(rule.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_matrix(&self, company_id: &CompanyId) -> Result<ApprovalMatrix, RepositoryError> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT matrix_json FROM company_approval_settings WHERE company_id = ?",
        )
        .bind(&company_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(ApprovalMatrix::default()),
        }
    }

    async fn load_flow(&self, company_id: &CompanyId) -> Result<ApprovalFlowPolicy, RepositoryError> {
        let row = sqlx::query(
            "SELECT self_approval_policy, auto_approve_threshold, require_business_head_approval
             FROM company_approval_settings WHERE company_id = ?",
        )
        .bind(&company_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(ApprovalFlowPolicy::default());
        };

        let policy: String = decode_column(&row, "self_approval_policy")?;
        let threshold: Option<String> = decode_column(&row, "auto_approve_threshold")?;
        let require_business_head: bool = decode_column(&row, "require_business_head_approval")?;

        Ok(ApprovalFlowPolicy {
            self_approval_policy: parse_self_approval(&policy)?,
            auto_approve_threshold: threshold
                .map(|raw| decode_decimal("auto_approve_threshold", &raw))
                .transpose()?,
            require_business_head_approval: require_business_head,
        })
    }

    async fn load_rules(&self, company_id: &CompanyId) -> Result<Vec<ApprovalRule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, company_id, trigger_type, threshold_value, approver_role,
                    approver_user_id, level, active
             FROM approval_rule WHERE company_id = ? ORDER BY id ASC",
        )
        .bind(&company_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_rule).collect()
    }

    async fn store_matrix(
        &self,
        company_id: &CompanyId,
        matrix: &ApprovalMatrix,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO company_approval_settings (company_id, matrix_json, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(company_id) DO UPDATE SET
                 matrix_json = excluded.matrix_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&company_id.0)
        .bind(serde_json::to_string(matrix)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn self_approval_as_str(policy: SelfApprovalPolicy) -> &'static str {
    match policy {
        SelfApprovalPolicy::SkipSelf => "SKIP_SELF",
        SelfApprovalPolicy::AllowSelf => "ALLOW_SELF",
    }
}

fn parse_self_approval(raw: &str) -> Result<SelfApprovalPolicy, RepositoryError> {
    match raw {
        "SKIP_SELF" => Ok(SelfApprovalPolicy::SkipSelf),
        "ALLOW_SELF" => Ok(SelfApprovalPolicy::AllowSelf),
        other => Err(RepositoryError::Decode(format!("unknown self approval policy `{other}`"))),
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRule, RepositoryError> {
    let id: String = decode_column(row, "id")?;
    let company_id: String = decode_column(row, "company_id")?;
    let trigger: String = decode_column(row, "trigger_type")?;
    let threshold: String = decode_column(row, "threshold_value")?;
    let role: String = decode_column(row, "approver_role")?;
    let approver_user_id: Option<String> = decode_column(row, "approver_user_id")?;
    let level: i64 = decode_column(row, "level")?;
    let active: bool = decode_column(row, "active")?;

    let level = u8::try_from(level)
        .ok()
        .and_then(ApprovalLevel::new)
        .ok_or_else(|| RepositoryError::Decode(format!("rule {id} has invalid level {level}")))?;

    Ok(ApprovalRule {
        trigger_type: TriggerType::parse(&trigger)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown trigger type `{trigger}`")))?,
        threshold_value: decode_decimal("approval_rule.threshold_value", &threshold)?,
        approver_role: RoleRef::parse_label(&role)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown approver role `{role}`")))?,
        approver_user_id: approver_user_id.map(UserId),
        level,
        active,
        id: RuleId(id),
        company_id: CompanyId(company_id),
    })
}

#[async_trait]
impl CompanyConfigurationService for SqlCompanyConfiguration {
    async fn approval_matrix(
        &self,
        company_id: &CompanyId,
    ) -> Result<ApprovalMatrix, CollaboratorError> {
        Ok(self.load_matrix(company_id).await?)
    }

    async fn approval_flow(
        &self,
        company_id: &CompanyId,
    ) -> Result<ApprovalFlowPolicy, CollaboratorError> {
        Ok(self.load_flow(company_id).await?)
    }

    async fn approval_rules(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<ApprovalRule>, CollaboratorError> {
        Ok(self.load_rules(company_id).await?)
    }

    async fn save_approval_matrix(
        &self,
        company_id: &CompanyId,
        matrix: ApprovalMatrix,
    ) -> Result<(), CollaboratorError> {
        Ok(self.store_matrix(company_id, &matrix).await?)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use expenso_core::collaborators::CompanyConfigurationService;
    use expenso_core::domain::company::{
        ApprovalFlowPolicy, ApprovalLevel, ApprovalMatrix, ApprovalRule, LevelConfig, RoleRef,
        SelfApprovalPolicy, SystemRole, TriggerType,
    };
    use expenso_core::domain::{CompanyId, CustomRoleId, RuleId};

    use super::SqlCompanyConfiguration;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlCompanyConfiguration {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlCompanyConfiguration::new(pool)
    }

    #[tokio::test]
    async fn unknown_company_gets_defaults() {
        let service = setup().await;
        let company = CompanyId::from("fresh");

        assert_eq!(
            service.approval_matrix(&company).await.expect("matrix"),
            ApprovalMatrix::default()
        );
        assert_eq!(
            service.approval_flow(&company).await.expect("flow"),
            ApprovalFlowPolicy::default()
        );
        assert!(service.approval_rules(&company).await.expect("rules").is_empty());
    }

    #[tokio::test]
    async fn matrix_and_flow_share_a_row_without_clobbering() {
        let service = setup().await;
        let company = CompanyId::from("acme");
        let matrix = ApprovalMatrix {
            level3: LevelConfig::enabled_with(vec![
                RoleRef::System(SystemRole::FinanceManager),
                RoleRef::Custom(CustomRoleId::from("travel-desk")),
            ]),
            ..ApprovalMatrix::default()
        };
        let flow = ApprovalFlowPolicy {
            self_approval_policy: SelfApprovalPolicy::AllowSelf,
            auto_approve_threshold: Some(Decimal::new(50000, 2)),
            require_business_head_approval: true,
        };

        service.save_flow(&company, &flow).await.expect("save flow");
        service.save_approval_matrix(&company, matrix.clone()).await.expect("save matrix");

        assert_eq!(service.approval_matrix(&company).await.expect("matrix"), matrix);
        assert_eq!(service.approval_flow(&company).await.expect("flow"), flow);
    }

    #[tokio::test]
    async fn rules_round_trip_with_labels_and_levels() {
        let service = setup().await;
        let company = CompanyId::from("acme");
        let rule = ApprovalRule {
            id: RuleId::from("rule-cfo"),
            company_id: company.clone(),
            trigger_type: TriggerType::ProjectBudgetExceeds,
            threshold_value: Decimal::new(100000, 0),
            approver_role: RoleRef::Custom(CustomRoleId::from("cfo")),
            approver_user_id: None,
            level: ApprovalLevel::new(3).expect("level"),
            active: false,
        };

        service.save_rule(&rule).await.expect("save rule");
        let loaded = service.approval_rules(&company).await.expect("rules");

        assert_eq!(loaded, vec![rule]);
        assert!(service.approval_rules(&CompanyId::from("other")).await.expect("rules").is_empty());
    }
}
