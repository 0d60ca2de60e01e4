use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::approvals::resolver::{ApproverResolver, ReportSnapshot, Resolution};
use crate::approvals::store::ConfigurationSnapshot;
use crate::domain::company::{ApprovalLevel, SelfApprovalPolicy};
use crate::domain::report::{ApproverEntry, EntryStatus, ExpenseReport};
use crate::domain::UserId;
use crate::errors::{ApprovalError, ConfigurationError};

/// What happens when every level was omitted or skipped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyChainPolicy {
    #[default]
    AutoApprove,
    Reject,
}

impl EmptyChainPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoApprove => "auto_approve",
            Self::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "auto_approve" => Some(Self::AutoApprove),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutoApprovalReason {
    BelowThreshold { threshold: Decimal },
    EmptyChain,
}

impl AutoApprovalReason {
    pub fn annotation(&self) -> String {
        match self {
            Self::BelowThreshold { threshold } => {
                format!("auto_approved: below_threshold {threshold}")
            }
            Self::EmptyChain => "auto_approved: empty_chain".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltChain {
    pub approvers: Vec<ApproverEntry>,
    pub auto_approval: Option<AutoApprovalReason>,
}

impl BuiltChain {
    pub fn first_pending(&self) -> Option<(ApprovalLevel, UserId)> {
        self.approvers
            .iter()
            .find(|entry| entry.status == EntryStatus::Pending)
            .map(|entry| (entry.level, entry.approver_id.clone()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalChainBuilder {
    empty_chain_policy: EmptyChainPolicy,
}

impl ApprovalChainBuilder {
    pub fn new(empty_chain_policy: EmptyChainPolicy) -> Self {
        Self { empty_chain_policy }
    }

    fn is_mandatory(config: &ConfigurationSnapshot, level: ApprovalLevel) -> bool {
        if level == ApprovalLevel::BUSINESS_HEAD {
            return config.flow.require_business_head_approval;
        }
        level.is_configurable() && config.matrix.is_enabled(level)
    }

    /// Builds a fresh chain for `report`. The result always replaces any chain
    /// from an earlier submission.
    pub async fn build(
        &self,
        resolver: &ApproverResolver<'_>,
        config: &ConfigurationSnapshot,
        report: &ExpenseReport,
        figures: &ReportSnapshot,
    ) -> Result<BuiltChain, ApprovalError> {
        if let Some(threshold) = config.flow.auto_approve_threshold {
            if figures.amount <= threshold {
                return Ok(BuiltChain {
                    approvers: Vec::new(),
                    auto_approval: Some(AutoApprovalReason::BelowThreshold { threshold }),
                });
            }
        }

        let mut approvers = Vec::new();
        for level in ApprovalLevel::all() {
            if !config.matrix.is_enabled(level) {
                continue;
            }

            match resolver.resolve(config, &report.owner_id, level, figures).await? {
                Resolution::Resolved(approver) => {
                    let skip = approver.user_id == report.owner_id
                        && config.flow.self_approval_policy == SelfApprovalPolicy::SkipSelf;
                    approvers.push(ApproverEntry {
                        level,
                        approver_id: approver.user_id,
                        approver_role: approver.role_label,
                        source: approver.source,
                        status: if skip { EntryStatus::Skipped } else { EntryStatus::NotStarted },
                        action_at: None,
                        acted_by: None,
                        comment: None,
                    });
                }
                Resolution::Ambiguous { role, candidates } => {
                    return Err(ConfigurationError::AmbiguousApprover { level, role, candidates }
                        .into());
                }
                Resolution::Unresolved if Self::is_mandatory(config, level) => {
                    return Err(ConfigurationError::MandatoryLevelUnresolved { level }.into());
                }
                Resolution::Unresolved => {
                    tracing::debug!(
                        event_name = "approval.chain.level_omitted",
                        report_id = %report.id,
                        level = %level,
                        "optional level has no approver"
                    );
                }
            }
        }

        match approvers.iter_mut().find(|entry| entry.status == EntryStatus::NotStarted) {
            Some(first) => {
                first.status = EntryStatus::Pending;
                Ok(BuiltChain { approvers, auto_approval: None })
            }
            None => match self.empty_chain_policy {
                EmptyChainPolicy::AutoApprove => {
                    Ok(BuiltChain { approvers, auto_approval: Some(AutoApprovalReason::EmptyChain) })
                }
                EmptyChainPolicy::Reject => Err(ConfigurationError::NoApprovableLevels.into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{ApprovalChainBuilder, AutoApprovalReason, EmptyChainPolicy};
    use crate::approvals::resolver::{ApproverResolver, ReportSnapshot};
    use crate::approvals::store::ConfigurationSnapshot;
    use crate::domain::company::{
        ApprovalFlowPolicy, ApprovalLevel, ApprovalMatrix, ApprovalRule, LevelConfig, RoleRef,
        SelfApprovalPolicy, SystemRole, TriggerType,
    };
    use crate::domain::report::{ApproverSource, EntryStatus, ExpenseReport};
    use crate::domain::{CompanyId, ReportId, RuleId, UserId};
    use crate::errors::{ApprovalError, ConfigurationError};
    use crate::memory::InMemoryIdentityDirectory;

    fn company() -> CompanyId {
        CompanyId::from("acme")
    }

    fn report(owner: &str) -> ExpenseReport {
        ExpenseReport::draft(ReportId::from("R-60000"), UserId::from(owner), company(), "INR")
    }

    fn accountant_matrix() -> ApprovalMatrix {
        ApprovalMatrix {
            level3: LevelConfig::enabled_with(vec![RoleRef::System(SystemRole::Accountant)]),
            ..ApprovalMatrix::default()
        }
    }

    fn big_spend_rule() -> ApprovalRule {
        ApprovalRule {
            id: RuleId::from("over-10k"),
            company_id: company(),
            trigger_type: TriggerType::ReportAmountExceeds,
            threshold_value: Decimal::new(10_000, 0),
            approver_role: RoleRef::System(SystemRole::BusinessHead),
            approver_user_id: None,
            level: ApprovalLevel::BUSINESS_HEAD,
            active: true,
        }
    }

    fn snapshot(
        matrix: ApprovalMatrix,
        flow: ApprovalFlowPolicy,
        rules: Vec<ApprovalRule>,
    ) -> ConfigurationSnapshot {
        ConfigurationSnapshot::new(company(), matrix, flow, rules)
    }

    async fn directory() -> InMemoryIdentityDirectory {
        let directory = InMemoryIdentityDirectory::default();
        directory.set_manager(&company(), UserId::from("emp"), UserId::from("mgr")).await;
        directory
            .grant_role(&company(), UserId::from("bh"), RoleRef::System(SystemRole::BusinessHead))
            .await;
        directory
            .grant_role(&company(), UserId::from("acct"), RoleRef::System(SystemRole::Accountant))
            .await;
        directory
    }

    #[tokio::test]
    async fn sixty_thousand_report_routes_through_three_levels() {
        let directory = directory().await;
        let resolver = ApproverResolver::new(&directory);
        let config = snapshot(
            accountant_matrix(),
            ApprovalFlowPolicy::default(),
            vec![big_spend_rule()],
        );

        let chain = ApprovalChainBuilder::default()
            .build(
                &resolver,
                &config,
                &report("emp"),
                &ReportSnapshot::for_amount(Decimal::new(60_000, 0)),
            )
            .await
            .expect("chain");

        let shape: Vec<(u8, &str, EntryStatus)> = chain
            .approvers
            .iter()
            .map(|entry| (entry.level.get(), entry.approver_id.as_str(), entry.status))
            .collect();
        assert_eq!(
            shape,
            vec![
                (1, "mgr", EntryStatus::Pending),
                (2, "bh", EntryStatus::NotStarted),
                (3, "acct", EntryStatus::NotStarted),
            ]
        );
        assert_eq!(
            chain.approvers[1].source,
            ApproverSource::ApprovalRule { rule_id: RuleId::from("over-10k") }
        );
        assert_eq!(chain.approvers[2].approver_role, "ACCOUNTANT");
        assert_eq!(chain.first_pending(), Some((ApprovalLevel::MANAGER, UserId::from("mgr"))));
    }

    #[tokio::test]
    async fn total_at_or_below_threshold_is_auto_approved() {
        let directory = directory().await;
        let resolver = ApproverResolver::new(&directory);
        let flow = ApprovalFlowPolicy {
            auto_approve_threshold: Some(Decimal::new(5_000, 0)),
            ..ApprovalFlowPolicy::default()
        };
        let config = snapshot(accountant_matrix(), flow, Vec::new());

        let chain = ApprovalChainBuilder::default()
            .build(
                &resolver,
                &config,
                &report("emp"),
                &ReportSnapshot::for_amount(Decimal::new(5_000, 0)),
            )
            .await
            .expect("auto approved");

        assert!(chain.approvers.is_empty());
        assert_eq!(
            chain.auto_approval,
            Some(AutoApprovalReason::BelowThreshold { threshold: Decimal::new(5_000, 0) })
        );
    }

    #[tokio::test]
    async fn owner_who_is_an_approver_is_skipped_under_skip_self() {
        let directory = directory().await;
        let resolver = ApproverResolver::new(&directory);
        let config = snapshot(accountant_matrix(), ApprovalFlowPolicy::default(), Vec::new());

        // The business head files a report; their own L2 entry is skipped.
        directory.set_manager(&company(), UserId::from("bh"), UserId::from("ceo")).await;
        let chain = ApprovalChainBuilder::default()
            .build(&resolver, &config, &report("bh"), &ReportSnapshot::for_amount(Decimal::ONE))
            .await
            .expect("chain");

        assert_eq!(chain.approvers[0].status, EntryStatus::Pending);
        assert_eq!(chain.approvers[1].approver_id, UserId::from("bh"));
        assert_eq!(chain.approvers[1].status, EntryStatus::Skipped);
        assert_eq!(chain.approvers[2].status, EntryStatus::NotStarted);

        let allow_self = snapshot(
            accountant_matrix(),
            ApprovalFlowPolicy {
                self_approval_policy: SelfApprovalPolicy::AllowSelf,
                ..ApprovalFlowPolicy::default()
            },
            Vec::new(),
        );
        let chain = ApprovalChainBuilder::default()
            .build(&resolver, &allow_self, &report("bh"), &ReportSnapshot::for_amount(Decimal::ONE))
            .await
            .expect("chain");
        assert_eq!(chain.approvers[1].status, EntryStatus::NotStarted);
    }

    #[tokio::test]
    async fn missing_manager_is_omitted_but_mandatory_level_fails() {
        let directory = InMemoryIdentityDirectory::default();
        directory
            .grant_role(&company(), UserId::from("bh"), RoleRef::System(SystemRole::BusinessHead))
            .await;
        let resolver = ApproverResolver::new(&directory);

        let config = snapshot(ApprovalMatrix::default(), ApprovalFlowPolicy::default(), Vec::new());
        let chain = ApprovalChainBuilder::default()
            .build(&resolver, &config, &report("emp"), &ReportSnapshot::for_amount(Decimal::ONE))
            .await
            .expect("optional L1 omitted");
        assert_eq!(chain.approvers.len(), 1);
        assert_eq!(chain.first_pending(), Some((ApprovalLevel::BUSINESS_HEAD, UserId::from("bh"))));

        let error = ApprovalChainBuilder::default()
            .build(
                &resolver,
                &snapshot(accountant_matrix(), ApprovalFlowPolicy::default(), Vec::new()),
                &report("emp"),
                &ReportSnapshot::for_amount(Decimal::ONE),
            )
            .await
            .expect_err("enabled L3 has no accountant");
        assert!(matches!(
            error,
            ApprovalError::Configuration(ConfigurationError::MandatoryLevelUnresolved { .. })
        ));
    }

    #[tokio::test]
    async fn business_head_is_mandatory_only_when_required() {
        let directory = InMemoryIdentityDirectory::default();
        directory.set_manager(&company(), UserId::from("emp"), UserId::from("mgr")).await;
        let resolver = ApproverResolver::new(&directory);

        let optional = snapshot(ApprovalMatrix::default(), ApprovalFlowPolicy::default(), Vec::new());
        let chain = ApprovalChainBuilder::default()
            .build(&resolver, &optional, &report("emp"), &ReportSnapshot::for_amount(Decimal::ONE))
            .await
            .expect("L2 omitted");
        assert_eq!(chain.approvers.len(), 1);

        let required = snapshot(
            ApprovalMatrix::default(),
            ApprovalFlowPolicy { require_business_head_approval: true, ..ApprovalFlowPolicy::default() },
            Vec::new(),
        );
        let error = ApprovalChainBuilder::default()
            .build(&resolver, &required, &report("emp"), &ReportSnapshot::for_amount(Decimal::ONE))
            .await
            .expect_err("L2 required");
        assert_eq!(error.code(), "CONFIGURATION_ERROR");
    }

    #[tokio::test]
    async fn ambiguous_role_fails_the_build() {
        let directory = directory().await;
        directory
            .grant_role(&company(), UserId::from("acct-2"), RoleRef::System(SystemRole::Accountant))
            .await;
        let resolver = ApproverResolver::new(&directory);
        let config = snapshot(accountant_matrix(), ApprovalFlowPolicy::default(), Vec::new());

        let error = ApprovalChainBuilder::default()
            .build(&resolver, &config, &report("emp"), &ReportSnapshot::for_amount(Decimal::ONE))
            .await
            .expect_err("two accountants");
        let ApprovalError::Configuration(ConfigurationError::AmbiguousApprover {
            level,
            candidates,
            ..
        }) = error
        else {
            panic!("expected an ambiguous approver error");
        };
        assert_eq!(level.get(), 3);
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn empty_chain_follows_the_configured_policy() {
        let directory = InMemoryIdentityDirectory::default();
        directory.set_manager(&company(), UserId::from("emp"), UserId::from("emp")).await;
        let resolver = ApproverResolver::new(&directory);
        let config = snapshot(ApprovalMatrix::default(), ApprovalFlowPolicy::default(), Vec::new());

        let chain = ApprovalChainBuilder::new(EmptyChainPolicy::AutoApprove)
            .build(&resolver, &config, &report("emp"), &ReportSnapshot::for_amount(Decimal::ONE))
            .await
            .expect("auto approved");
        assert_eq!(chain.auto_approval, Some(AutoApprovalReason::EmptyChain));
        assert_eq!(chain.approvers.len(), 1);
        assert_eq!(chain.approvers[0].status, EntryStatus::Skipped);
        assert_eq!(
            chain.auto_approval.map(|reason| reason.annotation()).as_deref(),
            Some("auto_approved: empty_chain")
        );

        let error = ApprovalChainBuilder::new(EmptyChainPolicy::Reject)
            .build(&resolver, &config, &report("emp"), &ReportSnapshot::for_amount(Decimal::ONE))
            .await
            .expect_err("reject policy");
        assert!(matches!(
            error,
            ApprovalError::Configuration(ConfigurationError::NoApprovableLevels)
        ));
    }

    #[test]
    fn empty_chain_policy_parses_config_values() {
        assert_eq!(EmptyChainPolicy::parse("auto-approve"), Some(EmptyChainPolicy::AutoApprove));
        assert_eq!(EmptyChainPolicy::parse("REJECT"), Some(EmptyChainPolicy::Reject));
        assert_eq!(EmptyChainPolicy::parse("maybe"), None);
    }
}
