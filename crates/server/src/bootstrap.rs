use std::sync::Arc;
use std::time::Duration;

use frontdesk_agent::{ConversationOrchestrator, LlmError, OpenAiCompatibleGateway, PipelineStores};
use frontdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use frontdesk_db::{connect, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::app::AppState;
use crate::outbound::LoggingDispatcher;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model gateway setup failed: {0}")]
    Llm(#[source] LlmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    bootstrap_with_config(AppConfig::load(options)?).await
}

/// Connects the database, applies migrations and wires the pipeline.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        model = %config.llm.model,
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let gateway = OpenAiCompatibleGateway::from_config(&config.llm).map_err(BootstrapError::Llm)?;
    let orchestrator = ConversationOrchestrator::new(
        PipelineStores::sql(db_pool.clone()),
        Arc::new(gateway),
        config.limits.policy(),
    );
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        outbound: Arc::new(LoggingDispatcher),
        voice_timeout: Duration::from_secs(config.server.voice_response_timeout_secs),
    };

    Ok(Application { config, db_pool, state })
}
