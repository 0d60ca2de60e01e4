use chrono::{DateTime, Utc};

use crate::approvals::BuiltChain;
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::company::{RoleRef, SystemRole};
use crate::domain::report::{EntryStatus, ExpenseReport, ExpenseStatus, ReportStatus};
use crate::errors::{ApprovalError, DomainError};
use crate::flows::states::{
    Actor, Authorization, Decision, ReportAction, TransitionEffect, TransitionOutcome,
};

/// Lifecycle of an expense report:
///
/// `DRAFT -> SUBMITTED -> PENDING_APPROVAL_L1..L5 -> APPROVED | REJECTED`, with
/// `CHANGES_REQUESTED` looping back through a full resubmission.
#[derive(Clone, Debug, Default)]
pub struct ReportStateMachine {
    override_roles: Vec<RoleRef>,
}

impl ReportStateMachine {
    pub fn new(override_roles: Vec<SystemRole>) -> Self {
        Self { override_roles: override_roles.into_iter().map(RoleRef::System).collect() }
    }

    pub fn override_roles(&self) -> &[RoleRef] {
        &self.override_roles
    }

    /// Guard for every action. Checks state first, then the actor, then the
    /// comment requirement. The override path is closed to the report owner.
    pub fn authorize(
        &self,
        report: &ExpenseReport,
        action: ReportAction,
        actor: &Actor,
        comment: Option<&str>,
    ) -> Result<Authorization, ApprovalError> {
        let invalid = || ApprovalError::InvalidState { status: report.status, action };

        match (report.status, action) {
            (ReportStatus::Draft | ReportStatus::ChangesRequested, ReportAction::Submit) => {
                if actor.id != report.owner_id {
                    return Err(ApprovalError::AccessDenied { actor_id: actor.id.clone(), action });
                }
                Ok(Authorization { actor_id: actor.id.clone(), action, override_role: None })
            }
            (status, ReportAction::Approve | ReportAction::Reject | ReportAction::RequestChanges)
                if status.pending_level().is_some() =>
            {
                let entry = report.pending_entry().ok_or_else(|| {
                    DomainError::InvariantViolation(format!(
                        "report {} is {} without a pending approver",
                        report.id,
                        status.as_str()
                    ))
                })?;

                let override_role = if entry.approver_id == actor.id {
                    None
                } else if actor.id == report.owner_id {
                    return Err(ApprovalError::AccessDenied { actor_id: actor.id.clone(), action });
                } else {
                    let held = actor.roles.iter().find(|role| self.override_roles.contains(role));
                    match held {
                        Some(role) => Some(role.clone()),
                        None => {
                            return Err(ApprovalError::AccessDenied {
                                actor_id: actor.id.clone(),
                                action,
                            });
                        }
                    }
                };

                if matches!(action, ReportAction::Reject | ReportAction::RequestChanges)
                    && comment.map(str::trim).map_or(true, str::is_empty)
                {
                    return Err(ApprovalError::Validation(format!(
                        "a comment is required to {}",
                        action.as_str()
                    )));
                }

                Ok(Authorization { actor_id: actor.id.clone(), action, override_role })
            }
            _ => Err(invalid()),
        }
    }

    /// Attaches a freshly built chain. Any previous chain is replaced, never
    /// appended to.
    pub fn submit(
        &self,
        report: &mut ExpenseReport,
        chain: BuiltChain,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let from = report.status;
        if !matches!(from, ReportStatus::Draft | ReportStatus::ChangesRequested) {
            return Err(ApprovalError::InvalidState { status: from, action: ReportAction::Submit });
        }

        report.status = ReportStatus::Submitted;
        report.submitted_at = Some(now);
        report.updated_at = now;
        report.annotations.clear();

        let mut effects = vec![TransitionEffect::ChainBuilt { levels: chain.approvers.len() }];
        let first_pending = chain.first_pending();
        report.approvers = chain.approvers;

        match (chain.auto_approval, first_pending) {
            (Some(reason), _) => {
                report.status = ReportStatus::Approved;
                report.annotations.push(reason.annotation());
                let moved = report.cascade_expenses(
                    &[ExpenseStatus::Draft, ExpenseStatus::ChangesRequested, ExpenseStatus::Pending],
                    ExpenseStatus::Approved,
                );
                effects.push(TransitionEffect::AutoApproved(reason));
                effects.push(TransitionEffect::CascadeExpenses { to: ExpenseStatus::Approved, moved });
                effects.push(TransitionEffect::NotifyOwner(report.owner_id.clone()));
            }
            (None, Some((level, approver_id))) => {
                report.status = ReportStatus::pending(level);
                let moved = report.cascade_expenses(
                    &[ExpenseStatus::Draft, ExpenseStatus::ChangesRequested],
                    ExpenseStatus::Pending,
                );
                effects.push(TransitionEffect::CascadeExpenses { to: ExpenseStatus::Pending, moved });
                effects.push(TransitionEffect::NotifyApprover(approver_id));
            }
            (None, None) => {
                return Err(DomainError::InvariantViolation(format!(
                    "chain for report {} has neither a pending level nor an auto-approval",
                    report.id
                ))
                .into());
            }
        }

        report.verify_chain()?;
        Ok(TransitionOutcome { from, to: report.status, action: ReportAction::Submit, effects })
    }

    /// Applies an approver decision to the pending level. `authorization` must
    /// come from [`ReportStateMachine::authorize`] for the same report.
    pub fn decide(
        &self,
        report: &mut ExpenseReport,
        decision: Decision,
        authorization: &Authorization,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let from = report.status;
        let action = ReportAction::from(decision);
        let index = report
            .pending_index()
            .ok_or(ApprovalError::InvalidState { status: from, action })?;

        let comment = comment.map(|value| value.trim().to_owned()).filter(|value| !value.is_empty());
        {
            let entry = &mut report.approvers[index];
            entry.action_at = Some(now);
            entry.comment = comment;
            entry.acted_by = authorization
                .override_role
                .as_ref()
                .map(|_| authorization.actor_id.clone());
        }
        report.updated_at = now;

        let mut effects = Vec::new();
        match decision {
            Decision::Approve => {
                report.approvers[index].status = EntryStatus::Approved;
                let next = report.approvers[index + 1..]
                    .iter()
                    .position(|entry| entry.status == EntryStatus::NotStarted)
                    .map(|offset| index + 1 + offset);

                if let Some(next) = next {
                    let entry = &mut report.approvers[next];
                    entry.status = EntryStatus::Pending;
                    report.status = ReportStatus::pending(entry.level);
                    effects.push(TransitionEffect::NotifyApprover(entry.approver_id.clone()));
                } else {
                    report.status = ReportStatus::Approved;
                    let moved =
                        report.cascade_expenses(&[ExpenseStatus::Pending], ExpenseStatus::Approved);
                    effects.push(TransitionEffect::CascadeExpenses {
                        to: ExpenseStatus::Approved,
                        moved,
                    });
                    effects.push(TransitionEffect::NotifyOwner(report.owner_id.clone()));
                }
            }
            Decision::Reject => {
                report.approvers[index].status = EntryStatus::Rejected;
                report.status = ReportStatus::Rejected;
                let moved =
                    report.cascade_expenses(&[ExpenseStatus::Pending], ExpenseStatus::Rejected);
                effects.push(TransitionEffect::CascadeExpenses { to: ExpenseStatus::Rejected, moved });
                effects.push(TransitionEffect::NotifyOwner(report.owner_id.clone()));
            }
            Decision::RequestChanges => {
                // The level goes back to NOT_STARTED; resubmission rebuilds the chain anyway.
                report.approvers[index].status = EntryStatus::NotStarted;
                report.status = ReportStatus::ChangesRequested;
                let moved = report
                    .cascade_expenses(&[ExpenseStatus::Pending], ExpenseStatus::ChangesRequested);
                effects.push(TransitionEffect::CascadeExpenses {
                    to: ExpenseStatus::ChangesRequested,
                    moved,
                });
                effects.push(TransitionEffect::NotifyOwner(report.owner_id.clone()));
            }
        }

        report.verify_chain()?;
        Ok(TransitionOutcome { from, to: report.status, action, effects })
    }

    pub fn record_outcome<S>(
        &self,
        result: &Result<TransitionOutcome, ApprovalError>,
        authorization: Option<&Authorization>,
        sink: &S,
        audit: &AuditContext,
    ) where
        S: AuditSink + ?Sized,
    {
        let event = match result {
            Ok(outcome) => {
                let mut event = AuditEvent::new(
                    audit,
                    format!("report.{}_applied", outcome.action.as_str()),
                    category_for(outcome.action),
                    AuditOutcome::Success,
                )
                .with_metadata("from", outcome.from.as_str())
                .with_metadata("to", outcome.to.as_str());
                if let Some(role) = authorization.and_then(|auth| auth.override_role.as_ref()) {
                    event = event.with_metadata("override_role", role.label());
                }
                for effect in &outcome.effects {
                    if let TransitionEffect::AutoApproved(reason) = effect {
                        event = event.with_metadata("auto_approved", reason.annotation());
                    }
                }
                event
            }
            Err(error) => AuditEvent::new(
                audit,
                "report.action_rejected",
                AuditCategory::Decision,
                AuditOutcome::Rejected,
            )
            .with_metadata("code", error.code())
            .with_metadata("error", error.to_string()),
        };

        if let Err(error) = sink.emit(event) {
            tracing::warn!(
                event_name = "approval.side_effect.failed",
                correlation_id = %audit.correlation_id,
                report_id = %audit.report_id,
                side_effect = "audit",
                error = %error,
                "audit sink rejected event"
            );
        }
    }
}

fn category_for(action: ReportAction) -> AuditCategory {
    match action {
        ReportAction::Submit => AuditCategory::Submission,
        ReportAction::Approve | ReportAction::Reject | ReportAction::RequestChanges => {
            AuditCategory::Decision
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::approvals::{AutoApprovalReason, BuiltChain};
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::company::{ApprovalLevel, RoleRef, SystemRole};
    use crate::domain::report::{
        ApproverEntry, ApproverSource, EntryStatus, ExpenseLine, ExpenseReport, ExpenseStatus,
        ReportStatus,
    };
    use crate::domain::{CompanyId, ExpenseId, ReportId, UserId};
    use crate::errors::ApprovalError;
    use crate::flows::engine::ReportStateMachine;
    use crate::flows::states::{Actor, Decision, ReportAction, TransitionEffect};

    fn entry(level: u8, approver: &str, status: EntryStatus) -> ApproverEntry {
        ApproverEntry {
            level: ApprovalLevel::new(level).expect("level"),
            approver_id: UserId::from(approver),
            approver_role: "MANAGER".to_owned(),
            source: ApproverSource::Matrix,
            status,
            action_at: None,
            acted_by: None,
            comment: None,
        }
    }

    fn draft() -> ExpenseReport {
        let mut report = ExpenseReport::draft(
            ReportId::from("R-7"),
            UserId::from("emp"),
            CompanyId::from("acme"),
            "INR",
        );
        report.expenses = vec![ExpenseLine {
            id: ExpenseId::from("E-1"),
            description: "client dinner".to_owned(),
            amount: Decimal::new(2_400, 0),
            status: ExpenseStatus::Draft,
        }];
        report
    }

    fn two_level_chain() -> BuiltChain {
        BuiltChain {
            approvers: vec![
                entry(1, "mgr", EntryStatus::Pending),
                entry(2, "emp", EntryStatus::Skipped),
                entry(3, "acct", EntryStatus::NotStarted),
            ],
            auto_approval: None,
        }
    }

    fn actor(id: &str) -> Actor {
        Actor::new(UserId::from(id), Vec::new())
    }

    fn submitted() -> ExpenseReport {
        let machine = ReportStateMachine::default();
        let mut report = draft();
        machine.submit(&mut report, two_level_chain(), Utc::now()).expect("submit");
        report
    }

    fn decide(
        machine: &ReportStateMachine,
        report: &mut ExpenseReport,
        decision: Decision,
        who: &Actor,
        comment: Option<&str>,
    ) -> Result<ReportStatus, ApprovalError> {
        let auth = machine.authorize(report, decision.into(), who, comment)?;
        machine
            .decide(report, decision, &auth, comment.map(str::to_owned), Utc::now())
            .map(|outcome| outcome.to)
    }

    #[test]
    fn submit_moves_to_first_pending_level_and_marks_lines_pending() {
        let report = submitted();

        assert_eq!(report.status, ReportStatus::PendingApprovalL1);
        assert_eq!(report.expenses[0].status, ExpenseStatus::Pending);
        assert!(report.submitted_at.is_some());
        report.verify_chain().expect("chain consistent");
    }

    #[test]
    fn approve_skips_skipped_entries_and_finishes_on_last_level() {
        let machine = ReportStateMachine::default();
        let mut report = submitted();

        let status = decide(&machine, &mut report, Decision::Approve, &actor("mgr"), None)
            .expect("manager approves");
        assert_eq!(status, ReportStatus::PendingApprovalL3);
        assert_eq!(report.approvers[1].status, EntryStatus::Skipped);

        let status = decide(&machine, &mut report, Decision::Approve, &actor("acct"), None)
            .expect("accountant approves");
        assert_eq!(status, ReportStatus::Approved);
        assert_eq!(report.expenses[0].status, ExpenseStatus::Approved);
        assert!(report.pending_entry().is_none());
    }

    #[test]
    fn reject_is_terminal_regardless_of_position() {
        let machine = ReportStateMachine::default();
        let mut report = submitted();

        let status = decide(
            &machine,
            &mut report,
            Decision::Reject,
            &actor("mgr"),
            Some("duplicate receipt"),
        )
        .expect("manager rejects");

        assert_eq!(status, ReportStatus::Rejected);
        assert_eq!(report.approvers[0].status, EntryStatus::Rejected);
        assert_eq!(report.approvers[2].status, EntryStatus::NotStarted);
        assert_eq!(report.expenses[0].status, ExpenseStatus::Rejected);

        let error = decide(&machine, &mut report, Decision::Approve, &actor("acct"), None)
            .expect_err("terminal report");
        assert!(matches!(error, ApprovalError::InvalidState { status: ReportStatus::Rejected, .. }));
    }

    #[test]
    fn request_changes_cascades_and_allows_owner_resubmission() {
        let machine = ReportStateMachine::default();
        let mut report = submitted();

        let status = decide(
            &machine,
            &mut report,
            Decision::RequestChanges,
            &actor("mgr"),
            Some("attach the hotel invoice"),
        )
        .expect("changes requested");
        assert_eq!(status, ReportStatus::ChangesRequested);
        assert_eq!(report.expenses[0].status, ExpenseStatus::ChangesRequested);

        machine
            .authorize(&report, ReportAction::Submit, &actor("emp"), None)
            .expect("owner may resubmit");
        let outcome = machine.submit(&mut report, two_level_chain(), Utc::now()).expect("resubmit");

        assert_eq!(outcome.from, ReportStatus::ChangesRequested);
        assert_eq!(report.approvers.len(), 3);
        assert!(report.approvers.iter().all(|entry| entry.comment.is_none()));
        assert_eq!(report.expenses[0].status, ExpenseStatus::Pending);
    }

    #[test]
    fn non_approver_without_override_is_denied() {
        let machine = ReportStateMachine::default();
        let report = submitted();

        let error = machine
            .authorize(&report, ReportAction::Approve, &actor("acct"), None)
            .expect_err("acct is not the L1 approver");
        assert!(matches!(error, ApprovalError::AccessDenied { .. }));
    }

    #[test]
    fn configured_override_role_may_act_and_is_recorded() {
        let machine = ReportStateMachine::new(vec![SystemRole::SuperAdmin]);
        let mut report = submitted();
        let admin = Actor::new(UserId::from("root"), vec![RoleRef::System(SystemRole::SuperAdmin)]);

        let auth = machine
            .authorize(&report, ReportAction::Approve, &admin, None)
            .expect("override role accepted");
        assert_eq!(auth.override_role, Some(RoleRef::System(SystemRole::SuperAdmin)));

        machine.decide(&mut report, Decision::Approve, &auth, None, Utc::now()).expect("approve");
        assert_eq!(report.approvers[0].acted_by, Some(UserId::from("root")));
        assert_eq!(report.approvers[0].approver_id, UserId::from("mgr"));
    }

    #[test]
    fn owner_holding_override_role_cannot_approve_own_report() {
        let machine = ReportStateMachine::new(vec![SystemRole::SuperAdmin]);
        let mut report = submitted();
        let owner = Actor::new(UserId::from("emp"), vec![RoleRef::System(SystemRole::SuperAdmin)]);

        let error = machine
            .authorize(&report, ReportAction::Approve, &owner, None)
            .expect_err("owner may not override on their own report");
        assert!(matches!(error, ApprovalError::AccessDenied { .. }));

        decide(&machine, &mut report, Decision::Approve, &actor("mgr"), None)
            .expect("manager approves");
        assert_eq!(report.status, ReportStatus::PendingApprovalL3);

        let error = decide(&machine, &mut report, Decision::Approve, &owner, None)
            .expect_err("owner still blocked at the next level");
        assert!(matches!(error, ApprovalError::AccessDenied { .. }));
        assert_eq!(report.status, ReportStatus::PendingApprovalL3);
    }

    #[test]
    fn reject_and_request_changes_always_need_a_comment() {
        let machine = ReportStateMachine::new(vec![SystemRole::SuperAdmin]);
        let report = submitted();

        for action in [ReportAction::Reject, ReportAction::RequestChanges] {
            let error = machine
                .authorize(&report, action, &actor("mgr"), None)
                .expect_err("missing comment");
            assert!(matches!(error, ApprovalError::Validation(_)));
        }
        machine
            .authorize(&report, ReportAction::Approve, &actor("mgr"), None)
            .expect("approve needs no comment");
    }

    #[test]
    fn override_role_is_ignored_unless_configured() {
        let machine = ReportStateMachine::default();
        let report = submitted();
        let admin = Actor::new(UserId::from("root"), vec![RoleRef::System(SystemRole::SuperAdmin)]);

        assert!(machine.override_roles().is_empty());
        assert!(machine.authorize(&report, ReportAction::Approve, &admin, None).is_err());
    }

    #[test]
    fn reject_without_comment_is_a_validation_error() {
        let machine = ReportStateMachine::default();
        let report = submitted();

        let error = machine
            .authorize(&report, ReportAction::Reject, &actor("mgr"), Some("   "))
            .expect_err("blank comment");
        assert!(matches!(error, ApprovalError::Validation(_)));
    }

    #[test]
    fn only_owner_may_submit_and_only_from_draft_or_changes_requested() {
        let machine = ReportStateMachine::default();
        let report = draft();

        let error = machine
            .authorize(&report, ReportAction::Submit, &actor("mgr"), None)
            .expect_err("not the owner");
        assert!(matches!(error, ApprovalError::AccessDenied { .. }));

        let pending = submitted();
        let error = machine
            .authorize(&pending, ReportAction::Submit, &actor("emp"), None)
            .expect_err("already pending");
        assert!(matches!(error, ApprovalError::InvalidState { .. }));

        let error = machine
            .authorize(&report, ReportAction::Approve, &actor("mgr"), None)
            .expect_err("draft cannot be approved");
        assert!(matches!(error, ApprovalError::InvalidState { status: ReportStatus::Draft, .. }));
    }

    #[test]
    fn auto_approved_chain_goes_straight_to_approved() {
        let machine = ReportStateMachine::default();
        let mut report = draft();
        let outcome = machine
            .submit(
                &mut report,
                BuiltChain {
                    approvers: Vec::new(),
                    auto_approval: Some(AutoApprovalReason::BelowThreshold {
                        threshold: Decimal::new(5_000, 0),
                    }),
                },
                Utc::now(),
            )
            .expect("auto approve");

        assert_eq!(outcome.to, ReportStatus::Approved);
        assert!(report.approvers.is_empty());
        assert_eq!(report.expenses[0].status, ExpenseStatus::Approved);
        assert!(outcome
            .effects
            .iter()
            .any(|effect| matches!(effect, TransitionEffect::AutoApproved(_))));
    }

    #[test]
    fn successful_transition_is_audited_with_override_metadata() {
        let machine = ReportStateMachine::new(vec![SystemRole::SuperAdmin]);
        let mut report = submitted();
        let admin = Actor::new(UserId::from("root"), vec![RoleRef::System(SystemRole::SuperAdmin)]);
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(
            report.id.clone(),
            report.company_id.clone(),
            "req-9",
            admin.id.as_str(),
        );

        let auth = machine.authorize(&report, ReportAction::Approve, &admin, None).expect("auth");
        let result = machine.decide(&mut report, Decision::Approve, &auth, None, Utc::now());
        machine.record_outcome(&result, Some(&auth), &sink, &audit);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "report.approve_applied");
        assert_eq!(events[0].metadata.get("override_role").map(String::as_str), Some("SUPER_ADMIN"));
        assert_eq!(events[0].correlation_id, "req-9");
    }
}
