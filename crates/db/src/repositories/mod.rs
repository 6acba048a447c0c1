use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use relaydesk_core::audit::AuditEvent;
use relaydesk_core::domain::bot_config::BotConfig;
use relaydesk_core::domain::contact::{Contact, ContactId, ContactMetadata, KanbanStatus};
use relaydesk_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use relaydesk_core::domain::message::{Message, NewMessage, SenderKind};
use relaydesk_core::domain::product::{NewProduct, Product};
use relaydesk_core::domain::workspace::{ChatInstance, InstanceKey, Workspace, WorkspaceId};
use relaydesk_core::flows::DialogueState;

use crate::DbPool;

pub mod audit;
pub mod bot_config;
pub mod contact;
pub mod conversation;
pub mod memory;
pub mod message;
pub mod product;
pub mod workspace;

pub use audit::SqlAuditEventRepository;
pub use bot_config::SqlBotConfigRepository;
pub use contact::SqlContactRepository;
pub use conversation::SqlConversationRepository;
pub use memory::InMemoryStore;
pub use message::SqlMessageRepository;
pub use product::SqlProductRepository;
pub use workspace::SqlWorkspaceRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
}

#[async_trait]
pub trait WorkspaceRepository: Send + Sync {
    async fn find_by_id(&self, id: WorkspaceId) -> Result<Option<Workspace>, RepositoryError>;
    async fn save(&self, workspace: Workspace) -> Result<(), RepositoryError>;
    async fn find_instance(
        &self,
        key: &InstanceKey,
    ) -> Result<Option<ChatInstance>, RepositoryError>;
    async fn save_instance(&self, instance: ChatInstance) -> Result<(), RepositoryError>;
    async fn list_instances(&self) -> Result<Vec<ChatInstance>, RepositoryError>;
}

#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, RepositoryError>;

    /// Returns the contact for `address`, creating it as `new_contact` when unknown.
    async fn find_or_create(
        &self,
        workspace_id: WorkspaceId,
        address: &str,
    ) -> Result<Contact, RepositoryError>;

    async fn update_status(
        &self,
        id: ContactId,
        status: &KanbanStatus,
    ) -> Result<(), RepositoryError>;

    async fn update_metadata(
        &self,
        id: ContactId,
        metadata: &ContactMetadata,
    ) -> Result<(), RepositoryError>;

    async fn update_name(&self, id: ContactId, name: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(&self, id: ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;

    /// The newest non-closed conversation for the contact, or a fresh
    /// `bot_handling` one carrying the initial dialogue state.
    async fn find_open_or_create(
        &self,
        workspace_id: WorkspaceId,
        contact_id: ContactId,
    ) -> Result<Conversation, RepositoryError>;

    async fn update_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RepositoryError>;

    async fn save_dialogue(
        &self,
        id: ConversationId,
        state: &DialogueState,
    ) -> Result<(), RepositoryError>;

    /// Appends a bot reply and stores the dialogue state it produced in one
    /// transaction.
    async fn record_bot_reply(
        &self,
        reply: NewMessage,
        state: &DialogueState,
    ) -> Result<Message, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: NewMessage) -> Result<Message, RepositoryError>;

    /// The last `limit` messages in chronological order.
    async fn recent(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// Messages from `sender` with `sent_at >= since`.
    async fn count_since(
        &self,
        conversation_id: ConversationId,
        sender: SenderKind,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError>;
}

#[async_trait]
pub trait BotConfigRepository: Send + Sync {
    async fn find(&self, workspace_id: WorkspaceId) -> Result<Option<BotConfig>, RepositoryError>;
    async fn save(&self, config: BotConfig) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Case-insensitive substring match over name, description and sku.
    async fn search(
        &self,
        workspace_id: WorkspaceId,
        term: &str,
        limit: u32,
    ) -> Result<Vec<Product>, RepositoryError>;

    async fn save(&self, product: NewProduct) -> Result<Product, RepositoryError>;
}

#[async_trait]
pub trait AuditEventRepository: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError>;
    async fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<AuditEvent>, RepositoryError>;
}

/// Every persistence collaborator the engine reads or writes.
#[derive(Clone)]
pub struct Repositories {
    pub workspaces: Arc<dyn WorkspaceRepository>,
    pub contacts: Arc<dyn ContactRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub bot_configs: Arc<dyn BotConfigRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub audit_events: Arc<dyn AuditEventRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            workspaces: Arc::new(SqlWorkspaceRepository::new(pool.clone())),
            contacts: Arc::new(SqlContactRepository::new(pool.clone())),
            conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool.clone())),
            bot_configs: Arc::new(SqlBotConfigRepository::new(pool.clone())),
            products: Arc::new(SqlProductRepository::new(pool.clone())),
            audit_events: Arc::new(SqlAuditEventRepository::new(pool)),
        }
    }

    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            workspaces: store.clone(),
            contacts: store.clone(),
            conversations: store.clone(),
            messages: store.clone(),
            bot_configs: store.clone(),
            products: store.clone(),
            audit_events: store,
        }
    }
}

/// Fixed-width RFC 3339 so string order equals time order inside SQLite.
pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {error}")))
}

pub(crate) fn decode_error(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
