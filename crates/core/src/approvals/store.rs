use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collaborators::CompanyConfigurationService;
use crate::domain::company::{ApprovalFlowPolicy, ApprovalMatrix, ApprovalRule};
use crate::domain::CompanyId;
use crate::errors::ApprovalError;

/// Immutable view of a company's approval configuration, read once per
/// submission so concurrent admin edits cannot change it mid-build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    pub company_id: CompanyId,
    pub matrix: ApprovalMatrix,
    pub flow: ApprovalFlowPolicy,
    /// Active rules only.
    pub rules: Vec<ApprovalRule>,
}

impl ConfigurationSnapshot {
    pub fn new(
        company_id: CompanyId,
        matrix: ApprovalMatrix,
        flow: ApprovalFlowPolicy,
        rules: Vec<ApprovalRule>,
    ) -> Self {
        let rules = rules
            .into_iter()
            .filter(|rule| rule.active && rule.company_id == company_id)
            .collect();
        Self { company_id, matrix, flow, rules }
    }
}

#[derive(Clone)]
pub struct ApprovalConfigurationStore {
    service: Arc<dyn CompanyConfigurationService>,
}

impl ApprovalConfigurationStore {
    pub fn new(service: Arc<dyn CompanyConfigurationService>) -> Self {
        Self { service }
    }

    pub async fn snapshot(
        &self,
        company_id: &CompanyId,
    ) -> Result<ConfigurationSnapshot, ApprovalError> {
        let matrix = self.service.approval_matrix(company_id).await?;
        let flow = self.service.approval_flow(company_id).await?;
        let rules = self.service.approval_rules(company_id).await?;
        Ok(ConfigurationSnapshot::new(company_id.clone(), matrix, flow, rules))
    }

    /// Rejects matrices that break the level3 ⊆ level4 ⊆ level5 prefix before
    /// they can reach any report.
    pub async fn update_matrix(
        &self,
        company_id: &CompanyId,
        matrix: ApprovalMatrix,
    ) -> Result<(), ApprovalError> {
        matrix.validate()?;
        self.service.save_approval_matrix(company_id, matrix).await?;
        tracing::info!(
            event_name = "approval.configuration.matrix_updated",
            company_id = %company_id,
            "approval matrix updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::ApprovalConfigurationStore;
    use crate::collaborators::CompanyConfigurationService;
    use crate::domain::company::{
        ApprovalLevel, ApprovalMatrix, ApprovalRule, LevelConfig, RoleRef, SystemRole, TriggerType,
    };
    use crate::domain::{CompanyId, RuleId};
    use crate::errors::{ApprovalError, ConfigurationError};
    use crate::memory::InMemoryCompanyConfiguration;

    fn rule(id: &str, active: bool) -> ApprovalRule {
        ApprovalRule {
            id: RuleId::from(id),
            company_id: CompanyId::from("acme"),
            trigger_type: TriggerType::ReportAmountExceeds,
            threshold_value: Decimal::new(10_000, 0),
            approver_role: RoleRef::System(SystemRole::BusinessHead),
            approver_user_id: None,
            level: ApprovalLevel::BUSINESS_HEAD,
            active,
        }
    }

    #[tokio::test]
    async fn snapshot_drops_inactive_rules() {
        let service = Arc::new(InMemoryCompanyConfiguration::default());
        let company = CompanyId::from("acme");
        service.put_rules(&company, vec![rule("active", true), rule("retired", false)]).await;
        let store = ApprovalConfigurationStore::new(service);

        let snapshot = store.snapshot(&company).await.expect("snapshot");
        assert_eq!(snapshot.rules.len(), 1);
        assert_eq!(snapshot.rules[0].id, RuleId::from("active"));
    }

    #[tokio::test]
    async fn enabling_level4_without_level3_fails_before_persisting() {
        let service = Arc::new(InMemoryCompanyConfiguration::default());
        let company = CompanyId::from("acme");
        let store = ApprovalConfigurationStore::new(service.clone());

        let error = store
            .update_matrix(
                &company,
                ApprovalMatrix {
                    level4: LevelConfig::enabled_with(vec![RoleRef::System(
                        SystemRole::FinanceManager,
                    )]),
                    ..ApprovalMatrix::default()
                },
            )
            .await
            .expect_err("level4 without level3");

        assert_eq!(error.code(), "CONFIGURATION_ERROR");
        assert!(matches!(
            error,
            ApprovalError::Configuration(ConfigurationError::MatrixInvariant(_))
        ));
        let stored = service.approval_matrix(&company).await.expect("read back");
        assert_eq!(stored, ApprovalMatrix::default());
    }

    #[tokio::test]
    async fn valid_matrix_is_persisted() {
        let service = Arc::new(InMemoryCompanyConfiguration::default());
        let company = CompanyId::from("acme");
        let store = ApprovalConfigurationStore::new(service.clone());
        let matrix = ApprovalMatrix {
            level3: LevelConfig::enabled_with(vec![RoleRef::System(SystemRole::Accountant)]),
            ..ApprovalMatrix::default()
        };

        store.update_matrix(&company, matrix.clone()).await.expect("valid matrix");
        assert_eq!(service.approval_matrix(&company).await.expect("read back"), matrix);
    }
}
