use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use relaydesk_core::audit::AuditEvent;
use relaydesk_core::domain::bot_config::BotConfig;
use relaydesk_core::domain::contact::{Contact, ContactId, ContactMetadata, KanbanStatus};
use relaydesk_core::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use relaydesk_core::domain::message::{Message, MessageId, NewMessage, SenderKind};
use relaydesk_core::domain::product::{NewProduct, Product, ProductId};
use relaydesk_core::domain::workspace::{ChatInstance, InstanceKey, Workspace, WorkspaceId};
use relaydesk_core::flows::DialogueState;

use super::{
    AuditEventRepository, BotConfigRepository, ContactRepository, ConversationRepository,
    MessageRepository, ProductRepository, RepositoryError, WorkspaceRepository,
};

#[derive(Default)]
struct StoreState {
    next_id: i64,
    workspaces: HashMap<WorkspaceId, Workspace>,
    instances: HashMap<InstanceKey, ChatInstance>,
    contacts: HashMap<ContactId, Contact>,
    conversations: HashMap<ConversationId, Conversation>,
    messages: Vec<Message>,
    bot_configs: HashMap<WorkspaceId, BotConfig>,
    products: HashMap<ProductId, Product>,
    audit_events: Vec<AuditEvent>,
}

impl StoreState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_message(&mut self, message: NewMessage) -> Message {
        let stored = Message {
            id: MessageId(self.allocate_id()),
            conversation_id: message.conversation_id,
            sender: message.sender,
            content: message.content,
            kind: message.kind,
            media_url: message.media_url,
            sent_at: message.sent_at,
        };
        self.messages.push(stored.clone());
        stored
    }

    fn contact_mut(&mut self, id: ContactId) -> Result<&mut Contact, RepositoryError> {
        self.contacts
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound { entity: "contact", id: id.to_string() })
    }

    fn conversation_mut(
        &mut self,
        id: ConversationId,
    ) -> Result<&mut Conversation, RepositoryError> {
        self.conversations
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound { entity: "conversation", id: id.to_string() })
    }
}

/// One lock over every collection, so multi-row writes are atomic the same way
/// the SQL transaction makes them.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full transcript of a conversation, oldest first.
    pub async fn transcript(&self, conversation_id: ConversationId) -> Vec<Message> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|message| message.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|left, right| {
            left.sent_at.cmp(&right.sent_at).then(left.id.0.cmp(&right.id.0))
        });
        messages
    }

    /// Rewrites a conversation's dialogue column, including back to NULL.
    pub async fn overwrite_dialogue(
        &self,
        id: ConversationId,
        dialogue: Option<DialogueState>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.conversation_mut(id)?.dialogue = dialogue;
        Ok(())
    }
}

#[async_trait]
impl WorkspaceRepository for InMemoryStore {
    async fn find_by_id(&self, id: WorkspaceId) -> Result<Option<Workspace>, RepositoryError> {
        Ok(self.state.read().await.workspaces.get(&id).cloned())
    }

    async fn save(&self, workspace: Workspace) -> Result<(), RepositoryError> {
        self.state.write().await.workspaces.insert(workspace.id, workspace);
        Ok(())
    }

    async fn find_instance(
        &self,
        key: &InstanceKey,
    ) -> Result<Option<ChatInstance>, RepositoryError> {
        Ok(self.state.read().await.instances.get(key).cloned())
    }

    async fn save_instance(&self, instance: ChatInstance) -> Result<(), RepositoryError> {
        self.state.write().await.instances.insert(instance.key.clone(), instance);
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<ChatInstance>, RepositoryError> {
        let mut instances: Vec<ChatInstance> =
            self.state.read().await.instances.values().cloned().collect();
        instances.sort_by(|left, right| left.key.cmp(&right.key));
        Ok(instances)
    }
}

#[async_trait]
impl ContactRepository for InMemoryStore {
    async fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, RepositoryError> {
        Ok(self.state.read().await.contacts.get(&id).cloned())
    }

    async fn find_or_create(
        &self,
        workspace_id: WorkspaceId,
        address: &str,
    ) -> Result<Contact, RepositoryError> {
        let mut state = self.state.write().await;
        let existing = state
            .contacts
            .values()
            .find(|contact| contact.workspace_id == workspace_id && contact.address == address)
            .cloned();
        if let Some(contact) = existing {
            return Ok(contact);
        }

        let now = Utc::now();
        let contact = Contact {
            id: ContactId(state.allocate_id()),
            workspace_id,
            address: address.to_owned(),
            name: None,
            status: KanbanStatus::NewContact,
            metadata: ContactMetadata::default(),
            created_at: now,
            updated_at: now,
        };
        state.contacts.insert(contact.id, contact.clone());
        Ok(contact)
    }

    async fn update_status(
        &self,
        id: ContactId,
        status: &KanbanStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let contact = state.contact_mut(id)?;
        contact.status = status.clone();
        contact.updated_at = Utc::now();
        Ok(())
    }

    async fn update_metadata(
        &self,
        id: ContactId,
        metadata: &ContactMetadata,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let contact = state.contact_mut(id)?;
        contact.metadata = metadata.clone();
        contact.updated_at = Utc::now();
        Ok(())
    }

    async fn update_name(&self, id: ContactId, name: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let contact = state.contact_mut(id)?;
        contact.name = Some(name.to_owned());
        contact.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for InMemoryStore {
    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.state.read().await.conversations.get(&id).cloned())
    }

    async fn find_open_or_create(
        &self,
        workspace_id: WorkspaceId,
        contact_id: ContactId,
    ) -> Result<Conversation, RepositoryError> {
        let mut state = self.state.write().await;
        let existing = state
            .conversations
            .values()
            .filter(|conversation| {
                conversation.workspace_id == workspace_id
                    && conversation.contact_id == contact_id
                    && conversation.status.is_open()
            })
            .max_by_key(|conversation| conversation.id)
            .cloned();
        if let Some(conversation) = existing {
            return Ok(conversation);
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId(state.allocate_id()),
            workspace_id,
            contact_id,
            status: ConversationStatus::BotHandling,
            dialogue: Some(DialogueState::default()),
            created_at: now,
            updated_at: now,
        };
        state.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn update_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let conversation = state.conversation_mut(id)?;
        conversation.status = status;
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn save_dialogue(
        &self,
        id: ConversationId,
        dialogue: &DialogueState,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let conversation = state.conversation_mut(id)?;
        conversation.dialogue = Some(dialogue.clone());
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn record_bot_reply(
        &self,
        reply: NewMessage,
        dialogue: &DialogueState,
    ) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        let conversation = state.conversation_mut(reply.conversation_id)?;
        conversation.dialogue = Some(dialogue.clone());
        conversation.updated_at = reply.sent_at;
        Ok(state.insert_message(reply))
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn append(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        Ok(self.state.write().await.insert_message(message))
    }

    async fn recent(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut messages = self.transcript(conversation_id).await;
        let skip = messages.len().saturating_sub(limit as usize);
        Ok(messages.split_off(skip))
    }

    async fn count_since(
        &self,
        conversation_id: ConversationId,
        sender: SenderKind,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        let state = self.state.read().await;
        let count = state
            .messages
            .iter()
            .filter(|message| {
                message.conversation_id == conversation_id
                    && message.sender == sender
                    && message.sent_at >= since
            })
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

#[async_trait]
impl BotConfigRepository for InMemoryStore {
    async fn find(&self, workspace_id: WorkspaceId) -> Result<Option<BotConfig>, RepositoryError> {
        Ok(self.state.read().await.bot_configs.get(&workspace_id).cloned())
    }

    async fn save(&self, config: BotConfig) -> Result<(), RepositoryError> {
        self.state.write().await.bot_configs.insert(config.workspace_id, config);
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for InMemoryStore {
    async fn search(
        &self,
        workspace_id: WorkspaceId,
        term: &str,
        limit: u32,
    ) -> Result<Vec<Product>, RepositoryError> {
        let needle = term.trim().to_lowercase();
        let state = self.state.read().await;
        let mut matches: Vec<Product> = state
            .products
            .values()
            .filter(|product| product.workspace_id == workspace_id)
            .filter(|product| {
                product.name.to_lowercase().contains(&needle)
                    || product.sku.to_lowercase().contains(&needle)
                    || product
                        .description
                        .as_deref()
                        .map(|description| description.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        matches.sort_by(|left, right| left.name.cmp(&right.name));
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn save(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        let mut state = self.state.write().await;
        let existing_id = state
            .products
            .values()
            .find(|stored| stored.workspace_id == product.workspace_id && stored.sku == product.sku)
            .map(|stored| stored.id);
        let id = match existing_id {
            Some(id) => id,
            None => ProductId(state.allocate_id()),
        };

        let stored = Product {
            id,
            workspace_id: product.workspace_id,
            sku: product.sku,
            name: product.name,
            price_cents: product.price_cents,
            quantity: product.quantity,
            description: product.description,
        };
        state.products.insert(id, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl AuditEventRepository for InMemoryStore {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        self.state.write().await.audit_events.push(event.clone());
        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .audit_events
            .iter()
            .filter(|event| event.conversation_id == Some(conversation_id))
            .cloned()
            .collect())
    }
}
