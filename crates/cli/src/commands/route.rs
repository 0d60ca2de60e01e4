//! `route`: previews the approver chain a report would get, and optionally
//! replays approver decisions, against a self-contained TOML scenario.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use expenso_core::approvals::{ApprovalChainBuilder, EmptyChainPolicy};
use expenso_core::audit::InMemoryAuditSink;
use expenso_core::collaborators::ReportRepository;
use expenso_core::config::{AppConfig, LoadOptions};
use expenso_core::domain::company::{
    ApprovalFlowPolicy, ApprovalLevel, ApprovalMatrix, ApprovalRule, ApproverMapping,
    EmployeeApprovalProfile, LevelAssignment, TriggerType,
};
use expenso_core::domain::report::{ExpenseLine, ExpenseReport, ExpenseStatus};
use expenso_core::domain::{CompanyId, CostCentreId, ExpenseId, ProjectId, ReportId, RuleId, UserId};
use expenso_core::flows::Decision;
use expenso_core::memory::{
    InMemoryCompanyConfiguration, InMemoryIdentityDirectory, InMemoryLedger,
    InMemoryReportRepository, RecordingNotificationDispatcher,
};
use expenso_core::processor::{ActionProcessor, ActionResult, Collaborators};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::commands::check_matrix::{parse_role, MatrixSpec};
use crate::commands::{current_thread_runtime, CommandResult};

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub company_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub empty_chain_policy: Option<EmptyChainPolicy>,
    #[serde(default)]
    pub flow: ApprovalFlowPolicy,
    #[serde(default)]
    pub matrix: MatrixSpec,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    #[serde(default)]
    pub users: Vec<UserSpec>,
    #[serde(default)]
    pub profiles: Vec<ProfileSpec>,
    #[serde(default)]
    pub mappings: Vec<MappingSpec>,
    pub report: ReportSpec,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub trigger: String,
    pub threshold: Decimal,
    pub role: String,
    #[serde(default)]
    pub approver_user_id: Option<String>,
    #[serde(default = "default_rule_level")]
    pub level: u8,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserSpec {
    pub id: String,
    #[serde(default)]
    pub manager: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentSpec {
    pub level: u8,
    pub approver: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileSpec {
    pub employee: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub approvers: Vec<AssignmentSpec>,
}

#[derive(Debug, Deserialize)]
pub struct MappingSpec {
    pub employee: String,
    #[serde(default)]
    pub levels: Vec<AssignmentSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ReportSpec {
    #[serde(default = "default_report_id")]
    pub id: String,
    pub owner: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub cost_centre_id: Option<String>,
    #[serde(default)]
    pub expenses: Vec<Decimal>,
    #[serde(default)]
    pub project_spend: Option<Decimal>,
    #[serde(default)]
    pub cost_centre_spend: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct ActionSpec {
    pub actor: String,
    pub decision: String,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_currency() -> String {
    "INR".to_string()
}

fn default_rule_level() -> u8 {
    ApprovalLevel::BUSINESS_HEAD.get()
}

fn default_true() -> bool {
    true
}

fn default_report_id() -> String {
    "preview".to_string()
}

#[derive(Debug, Serialize)]
struct Step {
    actor: String,
    decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Scenario rows translated into domain values, ready to seed collaborators.
struct Seed {
    company_id: CompanyId,
    matrix: ApprovalMatrix,
    rules: Vec<ApprovalRule>,
    profiles: Vec<EmployeeApprovalProfile>,
    mappings: Vec<ApproverMapping>,
    report: ExpenseReport,
    actions: Vec<(UserId, Decision, Option<String>)>,
}

impl Scenario {
    fn into_seed(self) -> Result<(Seed, ScenarioRest), String> {
        let company_id = CompanyId(self.company_id.clone());
        let matrix = self.matrix.to_matrix()?;

        let rules = self
            .rules
            .iter()
            .map(|rule| {
                Ok(ApprovalRule {
                    id: RuleId(rule.id.clone()),
                    company_id: company_id.clone(),
                    trigger_type: TriggerType::parse(&rule.trigger)
                        .ok_or_else(|| format!("unknown trigger `{}`", rule.trigger))?,
                    threshold_value: rule.threshold,
                    approver_role: parse_role(&rule.role)?,
                    approver_user_id: rule.approver_user_id.clone().map(UserId),
                    level: level(rule.level)?,
                    active: rule.active,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        let profiles = self
            .profiles
            .iter()
            .map(|profile| {
                Ok(EmployeeApprovalProfile {
                    employee_id: UserId(profile.employee.clone()),
                    active: profile.active,
                    approvers: assignments(&profile.approvers)?,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        let mappings = self
            .mappings
            .iter()
            .map(|mapping| {
                Ok(ApproverMapping {
                    employee_id: UserId(mapping.employee.clone()),
                    levels: assignments(&mapping.levels)?,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;

        let actions = self
            .actions
            .iter()
            .map(|action| {
                let decision = Decision::parse(&action.decision)
                    .ok_or_else(|| format!("unknown decision `{}`", action.decision))?;
                Ok((UserId(action.actor.clone()), decision, action.comment.clone()))
            })
            .collect::<Result<Vec<_>, String>>()?;

        let mut report = ExpenseReport::draft(
            ReportId(self.report.id.clone()),
            UserId(self.report.owner.clone()),
            company_id.clone(),
            self.currency.clone(),
        );
        report.project_id = self.report.project_id.clone().map(ProjectId);
        report.cost_centre_id = self.report.cost_centre_id.clone().map(CostCentreId);
        report.expenses = self
            .report
            .expenses
            .iter()
            .enumerate()
            .map(|(index, amount)| ExpenseLine {
                id: ExpenseId(format!("{}-line-{}", self.report.id, index + 1)),
                description: format!("line {}", index + 1),
                amount: *amount,
                status: ExpenseStatus::Draft,
            })
            .collect();

        let rest = ScenarioRest {
            empty_chain_policy: self.empty_chain_policy,
            flow: self.flow,
            users: self.users,
            project_spend: self.report.project_spend,
            cost_centre_spend: self.report.cost_centre_spend,
        };

        Ok((Seed { company_id, matrix, rules, profiles, mappings, report, actions }, rest))
    }
}

struct ScenarioRest {
    empty_chain_policy: Option<EmptyChainPolicy>,
    flow: ApprovalFlowPolicy,
    users: Vec<UserSpec>,
    project_spend: Option<Decimal>,
    cost_centre_spend: Option<Decimal>,
}

fn level(raw: u8) -> Result<ApprovalLevel, String> {
    ApprovalLevel::new(raw).ok_or_else(|| format!("approval level {raw} is outside 1..=5"))
}

fn assignments(specs: &[AssignmentSpec]) -> Result<Vec<LevelAssignment>, String> {
    specs
        .iter()
        .map(|spec| {
            Ok(LevelAssignment { level: level(spec.level)?, approver_id: UserId(spec.approver.clone()) })
        })
        .collect()
}

pub fn run(path: &Path) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "route",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let scenario = match fs::read_to_string(path)
        .map_err(|error| format!("could not read `{}`: {error}", path.display()))
        .and_then(|raw| {
            toml::from_str::<Scenario>(&raw)
                .map_err(|error| format!("could not parse `{}`: {error}", path.display()))
        }) {
        Ok(scenario) => scenario,
        Err(message) => return CommandResult::failure("route", "input", message, 6),
    };

    let (seed, rest) = match scenario.into_seed() {
        Ok(parts) => parts,
        Err(message) => return CommandResult::failure("route", "input", message, 6),
    };

    let users = match rest
        .users
        .iter()
        .map(|user| {
            let roles =
                user.roles.iter().map(|label| parse_role(label)).collect::<Result<Vec<_>, _>>()?;
            Ok((UserId(user.id.clone()), user.manager.clone().map(UserId), roles))
        })
        .collect::<Result<Vec<_>, String>>()
    {
        Ok(users) => users,
        Err(message) => return CommandResult::failure("route", "input", message, 6),
    };

    let runtime = match current_thread_runtime("route") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async move {
        let configuration = Arc::new(InMemoryCompanyConfiguration::default());
        let directory = Arc::new(InMemoryIdentityDirectory::default());
        let ledger = Arc::new(InMemoryLedger::default());
        let reports = Arc::new(InMemoryReportRepository::default());
        let audit = InMemoryAuditSink::default();
        let notifications = Arc::new(RecordingNotificationDispatcher::default());
        let company = &seed.company_id;

        configuration.put_matrix(company, seed.matrix).await;
        configuration.put_flow(company, rest.flow).await;
        configuration.put_rules(company, seed.rules).await;
        for (user_id, manager, roles) in users {
            if let Some(manager) = manager {
                directory.set_manager(company, user_id.clone(), manager).await;
            }
            for role in roles {
                directory.grant_role(company, user_id.clone(), role).await;
            }
        }
        for profile in seed.profiles {
            directory.put_profile(company, profile).await;
        }
        for mapping in seed.mappings {
            directory.put_mapping(company, mapping).await;
        }
        if let (Some(project_id), Some(spend)) = (&seed.report.project_id, rest.project_spend) {
            ledger.set_project_spend(company, project_id.clone(), spend).await;
        }
        if let (Some(cost_centre_id), Some(spend)) =
            (&seed.report.cost_centre_id, rest.cost_centre_spend)
        {
            ledger.set_cost_centre_spend(company, cost_centre_id.clone(), spend).await;
        }

        let report_id = seed.report.id.clone();
        let owner_id = seed.report.owner_id.clone();
        if let Err(error) = reports.insert(seed.report).await {
            return CommandResult::failure("route", "input", error.to_string(), 6);
        }

        let policy = rest.empty_chain_policy.unwrap_or(config.approvals.empty_chain_policy);
        let processor = ActionProcessor::new(
            Collaborators {
                reports,
                configuration,
                directory,
                ledger,
                audit: Arc::new(audit.clone()),
                notifications: notifications.clone(),
            },
            config.approvals.state_machine(),
            ApprovalChainBuilder::new(policy),
        );

        let submitted = match processor.submit(&report_id, &owner_id).await {
            Ok(result) => result,
            Err(error) => {
                return CommandResult::failure(
                    "route",
                    error.code(),
                    format!("submission failed: {error}"),
                    7,
                );
            }
        };

        let mut steps = Vec::new();
        let mut current = submitted.clone();
        for (actor, decision, comment) in seed.actions {
            match processor.act(&report_id, &actor, decision, comment).await {
                Ok(result) => {
                    current = result.clone();
                    steps.push(Step {
                        actor: actor.0,
                        decision,
                        result: Some(result),
                        error_code: None,
                        error: None,
                    });
                }
                Err(error) => {
                    steps.push(Step {
                        actor: actor.0,
                        decision,
                        result: None,
                        error_code: Some(error.code()),
                        error: Some(error.to_string()),
                    });
                    break;
                }
            }
        }

        let chain: Vec<String> = submitted
            .approvers
            .iter()
            .map(|entry| format!("{} {} ({})", entry.level, entry.approver_id, entry.approver_role))
            .collect();
        let message = if chain.is_empty() {
            format!("report {} routed with an empty chain: {}", report_id, submitted.status.as_str())
        } else {
            format!("report {} routed: {}", report_id, chain.join(" -> "))
        };

        CommandResult::success_with_data(
            "route",
            message,
            Some(json!({
                "submitted": submitted,
                "steps": steps,
                "final": current,
                "audit_events": audit.events().len(),
                "notifications": notifications.notifications(),
            })),
        )
    })
}
