use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{CompanyId, ReportId};
use crate::errors::CollaboratorError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Submission,
    Decision,
    Routing,
    Configuration,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub report_id: ReportId,
    pub company_id: CompanyId,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        report_id: ReportId,
        company_id: CompanyId,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { report_id, company_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub report_id: ReportId,
    pub company_id: CompanyId,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        context: &AuditContext,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            report_id: context.report_id.clone(),
            company_id: context.company_id.clone(),
            correlation_id: context.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: context.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Audit-log collaborator. Emission is best effort: callers log a failure and
/// carry on.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent) -> Result<(), CollaboratorError>;
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) -> Result<(), CollaboratorError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        Ok(())
    }
}

/// Forwards audit events to the `tracing` pipeline.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) -> Result<(), CollaboratorError> {
        let metadata = serde_json::to_string(&event.metadata)
            .map_err(|error| CollaboratorError::Integration(error.to_string()))?;
        tracing::info!(
            event_name = "audit.event",
            audit_event_type = %event.event_type,
            correlation_id = %event.correlation_id,
            report_id = %event.report_id,
            company_id = %event.company_id,
            actor = %event.actor,
            outcome = ?event.outcome,
            metadata = %metadata,
            "audit event recorded"
        );
        Ok(())
    }
}
