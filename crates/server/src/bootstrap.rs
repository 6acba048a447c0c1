use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use relaydesk_agent::{BillingError, Collaborators, ConversationOrchestrator};
use relaydesk_core::config::{AppConfig, ConfigError, LoadOptions};
use relaydesk_core::TransportError;
use relaydesk_db::{connect_with_settings, migrations, DbPool, Repositories};
use relaydesk_transport::{EvolutionClient, ReconnectPolicy, SessionRegistry};
use thiserror::Error;
use tracing::info;

use crate::health::{self, HealthState};
use crate::ixc::IxcGateway;
use crate::llm::{build_llm_client, ProviderError};
use crate::media::HttpMediaPreprocessor;
use crate::webhook::{self, WebhookState};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub repos: Repositories,
    pub registry: Arc<SessionRegistry>,
    pub orchestrator: Arc<ConversationOrchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("chat gateway client setup failed: {0}")]
    Transport(#[source] TransportError),
    #[error("llm provider setup failed: {0}")]
    Llm(#[from] ProviderError),
    #[error("media preprocessor setup failed: {0}")]
    Media(#[source] anyhow::Error),
    #[error("billing client setup failed: {0}")]
    Billing(#[source] BillingError),
}

impl Application {
    /// Health and webhook routes sharing the application's collaborators.
    pub fn router(&self) -> Router {
        health::router(HealthState {
            db_pool: self.db_pool.clone(),
            workspaces: self.repos.workspaces.clone(),
            registry: self.registry.clone(),
        })
        .merge(webhook::router(WebhookState {
            repos: self.repos.clone(),
            registry: self.registry.clone(),
            orchestrator: self.orchestrator.clone(),
            secret: self.config.server.webhook_secret.clone(),
        }))
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
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

    let repos = Repositories::sql(db_pool.clone());
    let chat_api = EvolutionClient::new(&config.transport).map_err(BootstrapError::Transport)?;
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(chat_api),
        ReconnectPolicy::from(&config.transport),
    ));
    let llm = build_llm_client(&config.llm)?;
    let media = HttpMediaPreprocessor::new(&config.media, &config.llm, llm.clone())
        .map_err(BootstrapError::Media)?;
    let billing = IxcGateway::new(Duration::from_secs(config.billing.timeout_secs))
        .map_err(BootstrapError::Billing)?;
    info!(
        event_name = "system.bootstrap.collaborators_ready",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        llm_model = %config.llm.model,
        "external collaborators configured"
    );

    let orchestrator = Arc::new(ConversationOrchestrator::new(
        repos.clone(),
        Collaborators {
            transport: registry.clone(),
            llm,
            billing: Arc::new(billing),
            media: Arc::new(media),
        },
        config.orchestrator.clone(),
    ));

    Ok(Application { config, db_pool, repos, registry, orchestrator })
}
