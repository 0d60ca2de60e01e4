use std::sync::Arc;

use expenso_core::audit::TracingAuditSink;
use expenso_core::collaborators::NoopNotificationDispatcher;
use expenso_core::config::{AppConfig, ApprovalsConfig, ConfigError};
use expenso_core::{ActionProcessor, Collaborators};
use expenso_db::{
    connect_with_config, migrations, DbPool, SqlCompanyConfiguration, SqlIdentityDirectory,
    SqlLedger, SqlReportRepository,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub processor: ActionProcessor,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let processor = sql_processor(&db_pool, &config.approvals);
    info!(
        event_name = "system.bootstrap.processor_ready",
        correlation_id = "bootstrap",
        override_roles = config.approvals.override_roles.len(),
        empty_chain_policy = config.approvals.empty_chain_policy.as_str(),
        "approval processor wired to sqlite collaborators"
    );

    Ok(Application { config, db_pool, processor })
}

/// Processor backed by the SQLite repositories. Audit goes to the tracing
/// pipeline and no notification transport is attached.
pub fn sql_processor(db_pool: &DbPool, approvals: &ApprovalsConfig) -> ActionProcessor {
    ActionProcessor::new(
        Collaborators {
            reports: Arc::new(SqlReportRepository::new(db_pool.clone())),
            configuration: Arc::new(SqlCompanyConfiguration::new(db_pool.clone())),
            directory: Arc::new(SqlIdentityDirectory::new(db_pool.clone())),
            ledger: Arc::new(SqlLedger::new(db_pool.clone())),
            audit: Arc::new(TracingAuditSink),
            notifications: Arc::new(NoopNotificationDispatcher),
        },
        approvals.state_machine(),
        approvals.chain_builder(),
    )
}
