use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use relaydesk_agent::llm::{ChatMessage, LlmClient};
use relaydesk_agent::{
    BillingError, BillingGateway, Collaborators, ConversationOrchestrator, ImageInsight,
    MediaInput, MediaPreprocessor,
};
use relaydesk_core::config::OrchestratorConfig;
use relaydesk_core::domain::billing::{BillingCustomer, Statement};
use relaydesk_core::{
    BillingCredentials, BotConfig, ChatInstance, InstanceKey, Invoice, OutboundDocument,
    TaxDocument, TransportError, UnblockOutcome, Workspace, WorkspaceId,
};
use relaydesk_db::repositories::{BotConfigRepository, WorkspaceRepository};
use relaydesk_db::{InMemoryStore, Repositories};
use relaydesk_transport::{ChatApi, ConnectionState, ReconnectPolicy, SessionRegistry};
use serde_json::json;
use tokio::sync::Mutex;

pub const INSTANCE: &str = "loja-1";

#[derive(Default)]
pub struct RecordingChatApi {
    pub sent: Mutex<Vec<String>>,
}

impl RecordingChatApi {
    /// Waits until `count` sends were recorded or the deadline passes.
    pub async fn wait_for(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            {
                let sent = self.sent.lock().await;
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ChatApi for RecordingChatApi {
    async fn send_text(
        &self,
        _instance: &InstanceKey,
        number: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        self.sent.lock().await.push(format!("{number}:{text}"));
        Ok(())
    }

    async fn send_media(
        &self,
        _instance: &InstanceKey,
        number: &str,
        document: &OutboundDocument,
    ) -> Result<(), TransportError> {
        self.sent.lock().await.push(format!("{number}:{}", document.file_name));
        Ok(())
    }

    async fn connection_state(
        &self,
        _instance: &InstanceKey,
    ) -> Result<ConnectionState, TransportError> {
        Ok(ConnectionState::Open)
    }
}

pub struct CannedLlm(pub &'static str);

#[async_trait]
impl LlmClient for CannedLlm {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok(self.0.to_owned())
    }
}

pub struct NoBilling;

#[async_trait]
impl BillingGateway for NoBilling {
    async fn find_customer_by_document(
        &self,
        _credentials: &BillingCredentials,
        _document: &TaxDocument,
    ) -> Result<Option<BillingCustomer>, BillingError> {
        Err(BillingError::NotConfigured)
    }

    async fn find_customer_by_phone(
        &self,
        _credentials: &BillingCredentials,
        _phone: &str,
    ) -> Result<Option<BillingCustomer>, BillingError> {
        Err(BillingError::NotConfigured)
    }

    async fn open_invoices(
        &self,
        _credentials: &BillingCredentials,
        _customer_id: &str,
    ) -> Result<Vec<Invoice>, BillingError> {
        Err(BillingError::NotConfigured)
    }

    async fn statement(
        &self,
        _credentials: &BillingCredentials,
        _invoice_id: &str,
    ) -> Result<Statement, BillingError> {
        Err(BillingError::NotConfigured)
    }

    async fn unblock(
        &self,
        _credentials: &BillingCredentials,
        _customer_id: &str,
    ) -> Result<UnblockOutcome, BillingError> {
        Err(BillingError::NotConfigured)
    }
}

pub struct NoMedia;

#[async_trait]
impl MediaPreprocessor for NoMedia {
    async fn transcribe(&self, _media: &MediaInput) -> Result<String> {
        Err(anyhow!("no transcription in tests"))
    }

    async fn describe_image(&self, _media: &MediaInput) -> Result<ImageInsight> {
        Err(anyhow!("no vision in tests"))
    }
}

pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub repos: Repositories,
    pub chat: Arc<RecordingChatApi>,
    pub registry: Arc<SessionRegistry>,
    pub orchestrator: Arc<ConversationOrchestrator>,
}

/// One workspace with an active bot and a registered instance.
pub async fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let workspace_id = WorkspaceId(1);
    WorkspaceRepository::save(
        store.as_ref(),
        Workspace { id: workspace_id, name: "Farmácia Vida".to_owned(), metadata: json!({}) },
    )
    .await
    .expect("workspace");
    store
        .save_instance(ChatInstance {
            key: InstanceKey(INSTANCE.to_owned()),
            workspace_id,
            display_name: None,
        })
        .await
        .expect("instance");
    BotConfigRepository::save(
        store.as_ref(),
        BotConfig { workspace_id, master_prompt: None, is_active: true, transfer_rules: Vec::new() },
    )
    .await
    .expect("bot config");

    let repos = Repositories::in_memory(store.clone());
    let chat = Arc::new(RecordingChatApi::default());
    let registry = Arc::new(SessionRegistry::new(chat.clone(), ReconnectPolicy::default()));
    let orchestrator = Arc::new(ConversationOrchestrator::new(
        repos.clone(),
        Collaborators {
            transport: registry.clone(),
            llm: Arc::new(CannedLlm("Olá! Como posso ajudar?")),
            billing: Arc::new(NoBilling),
            media: Arc::new(NoMedia),
        },
        OrchestratorConfig::default(),
    ));
    Fixture { store, repos, chat, registry, orchestrator }
}
