use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approvals::{
    ApprovalChainBuilder, ApprovalConfigurationStore, ApproverResolver, ReportSnapshot,
};
use crate::audit::{AuditContext, AuditSink};
use crate::collaborators::{
    CompanyConfigurationService, IdentityDirectory, LedgerService, Notification,
    NotificationDispatcher, ReportRepository, SaveOutcome,
};
use crate::domain::company::ApprovalMatrix;
use crate::domain::report::{ApproverEntry, ExpenseReport, ReportStatus};
use crate::domain::{CompanyId, ReportId, UserId};
use crate::errors::ApprovalError;
use crate::flows::{
    Actor, Authorization, Decision, ReportAction, ReportStateMachine, TransitionEffect,
    TransitionOutcome,
};

/// External systems the processor talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub reports: Arc<dyn ReportRepository>,
    pub configuration: Arc<dyn CompanyConfigurationService>,
    pub directory: Arc<dyn IdentityDirectory>,
    pub ledger: Arc<dyn LedgerService>,
    pub audit: Arc<dyn AuditSink>,
    pub notifications: Arc<dyn NotificationDispatcher>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub report_id: ReportId,
    pub status: ReportStatus,
    pub approvers: Vec<ApproverEntry>,
    pub version: u64,
}

impl From<&ExpenseReport> for ActionResult {
    fn from(report: &ExpenseReport) -> Self {
        Self {
            report_id: report.id.clone(),
            status: report.status,
            approvers: report.approvers.clone(),
            version: report.version,
        }
    }
}

struct Applied {
    report: ExpenseReport,
    outcome: TransitionOutcome,
    authorization: Authorization,
}

/// Entry point for submissions and approver decisions. Each call loads the
/// report, validates, transitions and commits with a version check; audit and
/// notification run after the commit and never fail the call.
#[derive(Clone)]
pub struct ActionProcessor {
    reports: Arc<dyn ReportRepository>,
    configuration: ApprovalConfigurationStore,
    directory: Arc<dyn IdentityDirectory>,
    ledger: Arc<dyn LedgerService>,
    audit: Arc<dyn AuditSink>,
    notifications: Arc<dyn NotificationDispatcher>,
    machine: ReportStateMachine,
    chain_builder: ApprovalChainBuilder,
}

impl ActionProcessor {
    pub fn new(
        collaborators: Collaborators,
        machine: ReportStateMachine,
        chain_builder: ApprovalChainBuilder,
    ) -> Self {
        Self {
            reports: collaborators.reports,
            configuration: ApprovalConfigurationStore::new(collaborators.configuration),
            directory: collaborators.directory,
            ledger: collaborators.ledger,
            audit: collaborators.audit,
            notifications: collaborators.notifications,
            machine,
            chain_builder,
        }
    }

    pub async fn report(&self, report_id: &ReportId) -> Result<ExpenseReport, ApprovalError> {
        self.reports
            .find_by_id(report_id)
            .await?
            .ok_or_else(|| ApprovalError::ReportNotFound(report_id.clone()))
    }

    pub async fn update_matrix(
        &self,
        company_id: &CompanyId,
        matrix: ApprovalMatrix,
    ) -> Result<(), ApprovalError> {
        self.configuration.update_matrix(company_id, matrix).await
    }

    pub async fn submit(
        &self,
        report_id: &ReportId,
        actor_id: &UserId,
    ) -> Result<ActionResult, ApprovalError> {
        self.submit_correlated(report_id, actor_id, Uuid::new_v4().to_string()).await
    }

    /// [`ActionProcessor::submit`] under a caller-supplied correlation id,
    /// which then appears on every log line and audit event of the call.
    pub async fn submit_correlated(
        &self,
        report_id: &ReportId,
        actor_id: &UserId,
        correlation_id: impl Into<String>,
    ) -> Result<ActionResult, ApprovalError> {
        let correlation_id = correlation_id.into();
        let report = self.load(report_id, actor_id, ReportAction::Submit, &correlation_id).await?;
        let audit = AuditContext::new(
            report.id.clone(),
            report.company_id.clone(),
            correlation_id,
            actor_id.as_str(),
        );

        let attempt = self.try_submit(report, actor_id).await;
        self.finish(ReportAction::Submit, attempt, &audit).await
    }

    pub async fn act(
        &self,
        report_id: &ReportId,
        actor_id: &UserId,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<ActionResult, ApprovalError> {
        self.act_correlated(report_id, actor_id, decision, comment, Uuid::new_v4().to_string())
            .await
    }

    pub async fn act_correlated(
        &self,
        report_id: &ReportId,
        actor_id: &UserId,
        decision: Decision,
        comment: Option<String>,
        correlation_id: impl Into<String>,
    ) -> Result<ActionResult, ApprovalError> {
        let action = ReportAction::from(decision);
        let correlation_id = correlation_id.into();
        let report = self.load(report_id, actor_id, action, &correlation_id).await?;
        let audit = AuditContext::new(
            report.id.clone(),
            report.company_id.clone(),
            correlation_id,
            actor_id.as_str(),
        );

        let attempt = self.try_decide(report, actor_id, decision, comment).await;
        self.finish(action, attempt, &audit).await
    }

    async fn load(
        &self,
        report_id: &ReportId,
        actor_id: &UserId,
        action: ReportAction,
        correlation_id: &str,
    ) -> Result<ExpenseReport, ApprovalError> {
        let loaded = self.report(report_id).await;
        if let Err(error) = &loaded {
            tracing::info!(
                event_name = "approval.action.rejected",
                correlation_id = %correlation_id,
                report_id = %report_id,
                actor_id = %actor_id,
                action = action.as_str(),
                code = error.code(),
                error = %error,
                "report could not be loaded"
            );
        }
        loaded
    }

    async fn actor(&self, report: &ExpenseReport, actor_id: &UserId) -> Result<Actor, ApprovalError> {
        let roles = self.directory.roles_of(&report.company_id, actor_id).await?;
        Ok(Actor::new(actor_id.clone(), roles))
    }

    async fn figures(&self, report: &ExpenseReport) -> Result<ReportSnapshot, ApprovalError> {
        let amount = self.ledger.report_total(report).await?;
        let project_spend = match &report.project_id {
            Some(project_id) => {
                self.ledger.project_spend(&report.company_id, project_id, &report.id).await?
            }
            None => Decimal::ZERO,
        };
        let cost_centre_spend = match &report.cost_centre_id {
            Some(cost_centre_id) => {
                self.ledger
                    .cost_centre_spend(&report.company_id, cost_centre_id, &report.id)
                    .await?
            }
            None => Decimal::ZERO,
        };

        Ok(ReportSnapshot {
            amount,
            project_id: report.project_id.clone(),
            cost_centre_id: report.cost_centre_id.clone(),
            project_spend,
            cost_centre_spend,
        })
    }

    async fn try_submit(
        &self,
        mut report: ExpenseReport,
        actor_id: &UserId,
    ) -> Result<Applied, ApprovalError> {
        let actor = self.actor(&report, actor_id).await?;
        let authorization = self.machine.authorize(&report, ReportAction::Submit, &actor, None)?;

        let figures = self.figures(&report).await?;
        let config = self.configuration.snapshot(&report.company_id).await?;
        let resolver = ApproverResolver::new(self.directory.as_ref());
        let chain = self.chain_builder.build(&resolver, &config, &report, &figures).await?;

        let expected_version = report.version;
        report.total.amount = figures.amount;
        let outcome = self.machine.submit(&mut report, chain, Utc::now())?;
        self.commit(&mut report, expected_version).await?;

        Ok(Applied { report, outcome, authorization })
    }

    async fn try_decide(
        &self,
        mut report: ExpenseReport,
        actor_id: &UserId,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<Applied, ApprovalError> {
        let actor = self.actor(&report, actor_id).await?;
        let authorization =
            self.machine.authorize(&report, decision.into(), &actor, comment.as_deref())?;

        let expected_version = report.version;
        let outcome =
            self.machine.decide(&mut report, decision, &authorization, comment, Utc::now())?;
        self.commit(&mut report, expected_version).await?;

        Ok(Applied { report, outcome, authorization })
    }

    /// Conditional write. Expense-line cascades are part of `report`, so they
    /// commit or fail together with the status change.
    async fn commit(
        &self,
        report: &mut ExpenseReport,
        expected_version: u64,
    ) -> Result<(), ApprovalError> {
        report.version = expected_version + 1;
        match self.reports.save_if_version(report, expected_version).await? {
            SaveOutcome::Saved => Ok(()),
            SaveOutcome::VersionConflict { current_version } => {
                tracing::debug!(
                    event_name = "approval.action.version_conflict",
                    report_id = %report.id,
                    expected_version,
                    current_version = ?current_version,
                    "report changed underneath the action"
                );
                Err(ApprovalError::StaleState { report_id: report.id.clone(), expected_version })
            }
        }
    }

    async fn finish(
        &self,
        action: ReportAction,
        attempt: Result<Applied, ApprovalError>,
        audit: &AuditContext,
    ) -> Result<ActionResult, ApprovalError> {
        match attempt {
            Ok(applied) => {
                let recorded = Ok(applied.outcome.clone());
                self.machine.record_outcome(
                    &recorded,
                    Some(&applied.authorization),
                    self.audit.as_ref(),
                    audit,
                );
                tracing::info!(
                    event_name = "approval.action.applied",
                    correlation_id = %audit.correlation_id,
                    report_id = %audit.report_id,
                    company_id = %audit.company_id,
                    actor_id = %audit.actor,
                    action = action.as_str(),
                    from = applied.outcome.from.as_str(),
                    to = applied.outcome.to.as_str(),
                    version = applied.report.version,
                    "approval action applied"
                );
                self.dispatch(&applied.report, &applied.outcome, audit).await;
                Ok(ActionResult::from(&applied.report))
            }
            Err(error) => {
                let recorded: Result<TransitionOutcome, ApprovalError> = Err(error.clone());
                self.machine.record_outcome(&recorded, None, self.audit.as_ref(), audit);
                tracing::info!(
                    event_name = "approval.action.rejected",
                    correlation_id = %audit.correlation_id,
                    report_id = %audit.report_id,
                    company_id = %audit.company_id,
                    actor_id = %audit.actor,
                    action = action.as_str(),
                    code = error.code(),
                    error = %error,
                    "approval action rejected"
                );
                Err(error)
            }
        }
    }

    async fn dispatch(&self, report: &ExpenseReport, outcome: &TransitionOutcome, audit: &AuditContext) {
        for effect in &outcome.effects {
            let notification = match effect {
                TransitionEffect::NotifyApprover(approver_id) => Notification::ApprovalRequested {
                    report_id: report.id.clone(),
                    approver_id: approver_id.clone(),
                    status: report.status,
                },
                TransitionEffect::NotifyOwner(owner_id) => Notification::ReportDecided {
                    report_id: report.id.clone(),
                    owner_id: owner_id.clone(),
                    status: report.status,
                },
                _ => continue,
            };

            if let Err(error) = self.notifications.notify(notification).await {
                tracing::warn!(
                    event_name = "approval.side_effect.failed",
                    correlation_id = %audit.correlation_id,
                    report_id = %audit.report_id,
                    side_effect = "notification",
                    error = %error,
                    "notification dispatch failed"
                );
            }
        }
    }
}
