use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::approvals::store::ConfigurationSnapshot;
use crate::collaborators::IdentityDirectory;
use crate::domain::company::{ApprovalLevel, ApprovalRule, RoleRef, SystemRole, TriggerType};
use crate::domain::report::ApproverSource;
use crate::domain::{CompanyId, CostCentreId, ProjectId, UserId};
use crate::errors::ApprovalError;

pub const MANUAL_APPROVER_LABEL: &str = "MANUAL_APPROVER";
pub const MAPPED_APPROVER_LABEL: &str = "MAPPED_APPROVER";

/// Report figures the resolver evaluates rule triggers against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub amount: Decimal,
    pub project_id: Option<ProjectId>,
    pub cost_centre_id: Option<CostCentreId>,
    /// Spend already committed against the project by other reports.
    pub project_spend: Decimal,
    pub cost_centre_spend: Decimal,
}

impl ReportSnapshot {
    pub fn for_amount(amount: Decimal) -> Self {
        Self {
            amount,
            project_id: None,
            cost_centre_id: None,
            project_spend: Decimal::ZERO,
            cost_centre_spend: Decimal::ZERO,
        }
    }

    /// Amount compared against the rule threshold, or `None` when the report
    /// carries no project or cost centre for a budget trigger.
    fn triggering_amount(&self, trigger: TriggerType) -> Option<Decimal> {
        match trigger {
            TriggerType::ReportAmountExceeds => Some(self.amount),
            TriggerType::ProjectBudgetExceeds => {
                self.project_id.as_ref().map(|_| self.project_spend + self.amount)
            }
            TriggerType::CostCentreBudgetExceeds => {
                self.cost_centre_id.as_ref().map(|_| self.cost_centre_spend + self.amount)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedApprover {
    pub user_id: UserId,
    pub role_label: String,
    pub source: ApproverSource,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    Resolved(ResolvedApprover),
    Ambiguous { role: String, candidates: Vec<UserId> },
    Unresolved,
}

/// Maps one (employee, level) pair to an approver. Precedence: active manual
/// profile, static mapping, triggered rule, matrix.
pub struct ApproverResolver<'a> {
    directory: &'a dyn IdentityDirectory,
}

impl<'a> ApproverResolver<'a> {
    pub fn new(directory: &'a dyn IdentityDirectory) -> Self {
        Self { directory }
    }

    pub async fn resolve(
        &self,
        config: &ConfigurationSnapshot,
        employee_id: &UserId,
        level: ApprovalLevel,
        report: &ReportSnapshot,
    ) -> Result<Resolution, ApprovalError> {
        let company_id = &config.company_id;

        if let Some(profile) = self.directory.approval_profile(company_id, employee_id).await? {
            if let Some(approver_id) = profile.approver_for(level) {
                return Ok(Resolution::Resolved(ResolvedApprover {
                    user_id: approver_id.clone(),
                    role_label: MANUAL_APPROVER_LABEL.to_owned(),
                    source: ApproverSource::ManualProfile,
                }));
            }
        }

        if let Some(mapping) = self.directory.approver_mapping(company_id, employee_id).await? {
            if let Some(approver_id) = mapping.approver_for(level) {
                return Ok(Resolution::Resolved(ResolvedApprover {
                    user_id: approver_id.clone(),
                    role_label: MAPPED_APPROVER_LABEL.to_owned(),
                    source: ApproverSource::ApproverMapping,
                }));
            }
        }

        if let Some(rule) = select_rule(&config.rules, level, report) {
            let source = ApproverSource::ApprovalRule { rule_id: rule.id.clone() };
            let resolution = self
                .resolve_roles(
                    company_id,
                    std::slice::from_ref(&rule.approver_role),
                    rule.approver_user_id.as_ref(),
                    source,
                )
                .await?;
            match resolution {
                Resolution::Unresolved => {
                    tracing::debug!(
                        event_name = "approval.resolver.rule_unresolved",
                        company_id = %company_id,
                        rule_id = %rule.id,
                        level = %level,
                        "triggered rule has no eligible approver, falling back to matrix"
                    );
                }
                other => return Ok(other),
            }
        }

        self.resolve_from_matrix(config, employee_id, level).await
    }

    async fn resolve_from_matrix(
        &self,
        config: &ConfigurationSnapshot,
        employee_id: &UserId,
        level: ApprovalLevel,
    ) -> Result<Resolution, ApprovalError> {
        let company_id = &config.company_id;
        match level.get() {
            1 => Ok(match self.directory.manager_of(company_id, employee_id).await? {
                Some(manager) => Resolution::Resolved(ResolvedApprover {
                    user_id: manager,
                    role_label: SystemRole::Manager.as_str().to_owned(),
                    source: ApproverSource::Matrix,
                }),
                None => Resolution::Unresolved,
            }),
            2 => {
                self.resolve_roles(
                    company_id,
                    &[RoleRef::System(SystemRole::BusinessHead)],
                    None,
                    ApproverSource::Matrix,
                )
                .await
            }
            _ => match config.matrix.level(level) {
                Some(level_config) if level_config.enabled => {
                    self.resolve_roles(
                        company_id,
                        &level_config.approver_roles,
                        None,
                        ApproverSource::Matrix,
                    )
                    .await
                }
                _ => Ok(Resolution::Unresolved),
            },
        }
    }

    async fn resolve_roles(
        &self,
        company_id: &CompanyId,
        roles: &[RoleRef],
        approver_user_id: Option<&UserId>,
        source: ApproverSource,
    ) -> Result<Resolution, ApprovalError> {
        // (holder, first role it was found under), ordered by first appearance.
        let mut holders: Vec<(UserId, &RoleRef)> = Vec::new();
        for role in roles {
            for user in self.directory.users_with_role(company_id, role).await? {
                if !holders.iter().any(|(existing, _)| *existing == user) {
                    holders.push((user, role));
                }
            }
        }

        if let Some(wanted) = approver_user_id {
            return Ok(match holders.into_iter().find(|(user, _)| user == wanted) {
                Some((user_id, role)) => {
                    Resolution::Resolved(ResolvedApprover { user_id, role_label: role.label(), source })
                }
                None => Resolution::Unresolved,
            });
        }

        match holders.len() {
            0 => Ok(Resolution::Unresolved),
            1 => {
                let (user_id, role) = holders.remove(0);
                Ok(Resolution::Resolved(ResolvedApprover {
                    user_id,
                    role_label: role.label(),
                    source,
                }))
            }
            _ => {
                let role = roles.iter().map(RoleRef::label).collect::<Vec<_>>().join(",");
                let mut candidates: Vec<UserId> =
                    holders.into_iter().map(|(user, _)| user).collect();
                candidates.sort();
                Ok(Resolution::Ambiguous { role, candidates })
            }
        }
    }
}

/// Picks the triggered rule for `level`: the greatest threshold wins, and a
/// tie goes to the lowest rule id.
pub fn select_rule<'r>(
    rules: &'r [ApprovalRule],
    level: ApprovalLevel,
    report: &ReportSnapshot,
) -> Option<&'r ApprovalRule> {
    rules
        .iter()
        .filter(|rule| rule.active && rule.level == level)
        .filter(|rule| {
            report
                .triggering_amount(rule.trigger_type)
                .is_some_and(|amount| amount > rule.threshold_value)
        })
        .max_by(|left, right| {
            left.threshold_value
                .cmp(&right.threshold_value)
                .then_with(|| right.id.cmp(&left.id))
        })
}
