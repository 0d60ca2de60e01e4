//! Per-company approval configuration: the level matrix, the flow policy,
//! threshold rules and the per-employee overrides.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{CompanyId, CustomRoleId, RuleId, UserId};
use crate::errors::ConfigurationError;

/// Sequential position (1..=5) in a report's approver chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ApprovalLevel(u8);

impl ApprovalLevel {
    pub const MANAGER: Self = Self(1);
    pub const BUSINESS_HEAD: Self = Self(2);
    pub const MAX: u8 = 5;

    pub fn new(level: u8) -> Option<Self> {
        (1..=Self::MAX).contains(&level).then_some(Self(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (1..=Self::MAX).map(Self)
    }

    pub fn is_configurable(self) -> bool {
        self.0 >= 3
    }
}

impl TryFrom<u8> for ApprovalLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
            .ok_or_else(|| format!("approval level must be in range 1..={}, got {value}", Self::MAX))
    }
}

impl From<ApprovalLevel> for u8 {
    fn from(value: ApprovalLevel) -> Self {
        value.0
    }
}

impl fmt::Display for ApprovalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemRole {
    Employee,
    Manager,
    BusinessHead,
    Accountant,
    FinanceManager,
    CompanyAdmin,
    SuperAdmin,
}

impl SystemRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "EMPLOYEE",
            Self::Manager => "MANAGER",
            Self::BusinessHead => "BUSINESS_HEAD",
            Self::Accountant => "ACCOUNTANT",
            Self::FinanceManager => "FINANCE_MANAGER",
            Self::CompanyAdmin => "COMPANY_ADMIN",
            Self::SuperAdmin => "SUPER_ADMIN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "EMPLOYEE" => Some(Self::Employee),
            "MANAGER" => Some(Self::Manager),
            "BUSINESS_HEAD" => Some(Self::BusinessHead),
            "ACCOUNTANT" => Some(Self::Accountant),
            "FINANCE_MANAGER" => Some(Self::FinanceManager),
            "COMPANY_ADMIN" => Some(Self::CompanyAdmin),
            "SUPER_ADMIN" => Some(Self::SuperAdmin),
            _ => None,
        }
    }
}

/// A role held by company users: either a fixed system role or a
/// company-defined custom role.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RoleRef {
    System(SystemRole),
    Custom(CustomRoleId),
}

impl RoleRef {
    pub fn label(&self) -> String {
        match self {
            Self::System(role) => role.as_str().to_owned(),
            Self::Custom(id) => format!("custom:{id}"),
        }
    }

    /// Inverse of [`RoleRef::label`].
    pub fn parse_label(value: &str) -> Option<Self> {
        match value.trim().strip_prefix("custom:") {
            Some(id) if !id.is_empty() => Some(Self::Custom(CustomRoleId(id.to_owned()))),
            Some(_) => None,
            None => SystemRole::parse(value).map(Self::System),
        }
    }
}

impl From<SystemRole> for RoleRef {
    fn from(value: SystemRole) -> Self {
        Self::System(value)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelConfig {
    pub enabled: bool,
    #[serde(default)]
    pub approver_roles: Vec<RoleRef>,
}

impl LevelConfig {
    pub fn enabled_with(roles: Vec<RoleRef>) -> Self {
        Self { enabled: true, approver_roles: roles }
    }
}

/// Company-wide level switchboard. Levels 1 and 2 are implicit (manager and
/// business head); levels 3..=5 form a monotonic prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalMatrix {
    #[serde(default)]
    pub level3: LevelConfig,
    #[serde(default)]
    pub level4: LevelConfig,
    #[serde(default)]
    pub level5: LevelConfig,
}

impl ApprovalMatrix {
    pub fn level(&self, level: ApprovalLevel) -> Option<&LevelConfig> {
        match level.get() {
            3 => Some(&self.level3),
            4 => Some(&self.level4),
            5 => Some(&self.level5),
            _ => None,
        }
    }

    pub fn is_enabled(&self, level: ApprovalLevel) -> bool {
        self.level(level).map(|config| config.enabled).unwrap_or(true)
    }

    /// Write-time check. Reports always see a matrix that already passed it.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.level4.enabled && !self.level3.enabled {
            return Err(ConfigurationError::MatrixInvariant(
                "level4 cannot be enabled while level3 is disabled".to_owned(),
            ));
        }
        if self.level5.enabled && !self.level4.enabled {
            return Err(ConfigurationError::MatrixInvariant(
                "level5 cannot be enabled while level4 is disabled".to_owned(),
            ));
        }

        for level in ApprovalLevel::all().filter(|level| level.is_configurable()) {
            if let Some(config) = self.level(level) {
                if config.enabled && config.approver_roles.is_empty() {
                    return Err(ConfigurationError::MatrixInvariant(format!(
                        "level{} is enabled but lists no approver roles",
                        level.get()
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelfApprovalPolicy {
    #[default]
    SkipSelf,
    AllowSelf,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFlowPolicy {
    #[serde(default)]
    pub self_approval_policy: SelfApprovalPolicy,
    #[serde(default)]
    pub auto_approve_threshold: Option<Decimal>,
    #[serde(default)]
    pub require_business_head_approval: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    ReportAmountExceeds,
    ProjectBudgetExceeds,
    CostCentreBudgetExceeds,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReportAmountExceeds => "REPORT_AMOUNT_EXCEEDS",
            Self::ProjectBudgetExceeds => "PROJECT_BUDGET_EXCEEDS",
            Self::CostCentreBudgetExceeds => "COST_CENTRE_BUDGET_EXCEEDS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "REPORT_AMOUNT_EXCEEDS" => Some(Self::ReportAmountExceeds),
            "PROJECT_BUDGET_EXCEEDS" => Some(Self::ProjectBudgetExceeds),
            "COST_CENTRE_BUDGET_EXCEEDS" => Some(Self::CostCentreBudgetExceeds),
            _ => None,
        }
    }
}

fn default_rule_level() -> ApprovalLevel {
    ApprovalLevel::BUSINESS_HEAD
}

fn default_active() -> bool {
    true
}

/// Threshold-triggered override of the approver role at one level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: RuleId,
    pub company_id: CompanyId,
    pub trigger_type: TriggerType,
    pub threshold_value: Decimal,
    pub approver_role: RoleRef,
    #[serde(default)]
    pub approver_user_id: Option<UserId>,
    #[serde(default = "default_rule_level")]
    pub level: ApprovalLevel,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelAssignment {
    pub level: ApprovalLevel,
    pub approver_id: UserId,
}

/// Manual chain maintained by a company admin for one employee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeApprovalProfile {
    pub employee_id: UserId,
    pub active: bool,
    pub approvers: Vec<LevelAssignment>,
}

impl EmployeeApprovalProfile {
    pub fn approver_for(&self, level: ApprovalLevel) -> Option<&UserId> {
        if !self.active {
            return None;
        }
        self.approvers
            .iter()
            .find(|assignment| assignment.level == level)
            .map(|assignment| &assignment.approver_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverMapping {
    pub employee_id: UserId,
    pub levels: Vec<LevelAssignment>,
}

impl ApproverMapping {
    pub fn approver_for(&self, level: ApprovalLevel) -> Option<&UserId> {
        self.levels
            .iter()
            .find(|assignment| assignment.level == level)
            .map(|assignment| &assignment.approver_id)
    }
}
