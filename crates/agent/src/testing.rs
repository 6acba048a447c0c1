//! Scripted collaborators for engine tests.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use relaydesk_core::domain::billing::{BillingCustomer, Statement};
use relaydesk_core::{
    BillingCredentials, InstanceKey, Invoice, OutboundDocument, Product, ProductId, TaxDocument,
    Transport, TransportError, UnblockOutcome, WorkspaceId,
};
use tokio::sync::Mutex;

use crate::billing::{BillingError, BillingGateway};
use crate::llm::{ChatMessage, LlmClient};
use crate::media::{ImageInsight, MediaInput, MediaPreprocessor};

pub fn product(id: i64, sku: &str, name: &str, price_cents: i64) -> Product {
    Product {
        id: ProductId(id),
        workspace_id: WorkspaceId(1),
        sku: sku.to_owned(),
        name: name.to_owned(),
        price_cents,
        quantity: 10,
        description: None,
    }
}

pub fn credentials() -> BillingCredentials {
    BillingCredentials {
        api_url: "https://erp.example.test/webservice/v1".to_owned(),
        api_token: "1:secret-token".to_owned().into(),
    }
}

/// Replies from a queue, repeating the last one, and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    delay: Option<Duration>,
    fail: bool,
}

impl ScriptedLlm {
    pub fn replying(reply: &str) -> Self {
        Self { last: Mutex::new(reply.to_owned()), ..Self::default() }
    }

    pub fn with_replies(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|reply| (*reply).to_owned()).collect()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().await.push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(anyhow!("model unavailable"));
        }
        let mut last = self.last.lock().await;
        if let Some(next) = self.replies.lock().await.pop_front() {
            *last = next;
        }
        Ok(last.clone())
    }
}

/// One customer ("Maria Souza") with an overdue and a due-today invoice.
#[derive(Default)]
pub struct FakeBilling {
    customer: Option<BillingCustomer>,
    invoices: Vec<Invoice>,
    statements_fail: bool,
    invoice_delay: Option<Duration>,
    phone_lookups: Mutex<Vec<String>>,
    unblocks: Mutex<Vec<String>>,
}

impl FakeBilling {
    pub fn with_customer() -> Self {
        let date = |day| NaiveDate::from_ymd_opt(2025, 3, day).unwrap_or_default();
        Self {
            customer: Some(BillingCustomer {
                id: "cus-1".to_owned(),
                name: "Maria Souza".to_owned(),
                document: Some("08484431606".to_owned()),
            }),
            invoices: vec![
                Invoice {
                    id: "inv-1".to_owned(),
                    customer_id: "cus-1".to_owned(),
                    amount_cents: 12_990,
                    due_date: date(5),
                    document_number: Some("000123".to_owned()),
                    payment_reference: Some("34191.79001 01043.510047".to_owned()),
                },
                Invoice {
                    id: "inv-2".to_owned(),
                    customer_id: "cus-1".to_owned(),
                    amount_cents: 12_990,
                    due_date: date(10),
                    document_number: None,
                    payment_reference: None,
                },
            ],
            ..Self::default()
        }
    }

    pub fn failing_statements(mut self) -> Self {
        self.statements_fail = true;
        self
    }

    pub fn slow_invoices(mut self, delay: Duration) -> Self {
        self.invoice_delay = Some(delay);
        self
    }

    pub async fn phone_lookups(&self) -> Vec<String> {
        self.phone_lookups.lock().await.clone()
    }

    pub async fn unblocks(&self) -> Vec<String> {
        self.unblocks.lock().await.clone()
    }
}

#[async_trait]
impl BillingGateway for FakeBilling {
    async fn find_customer_by_document(
        &self,
        _credentials: &BillingCredentials,
        document: &TaxDocument,
    ) -> Result<Option<BillingCustomer>, BillingError> {
        Ok(self
            .customer
            .clone()
            .filter(|customer| customer.document.as_deref() == Some(document.digits())))
    }

    async fn find_customer_by_phone(
        &self,
        _credentials: &BillingCredentials,
        phone: &str,
    ) -> Result<Option<BillingCustomer>, BillingError> {
        self.phone_lookups.lock().await.push(phone.to_owned());
        Ok(None)
    }

    async fn open_invoices(
        &self,
        _credentials: &BillingCredentials,
        customer_id: &str,
    ) -> Result<Vec<Invoice>, BillingError> {
        if let Some(delay) = self.invoice_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.invoices.iter().filter(|invoice| invoice.customer_id == customer_id).cloned().collect())
    }

    async fn statement(
        &self,
        _credentials: &BillingCredentials,
        invoice_id: &str,
    ) -> Result<Statement, BillingError> {
        if self.statements_fail {
            return Err(BillingError::Rejected { status: 404, body: "boleto indisponível".to_owned() });
        }
        Ok(Statement {
            invoice_id: invoice_id.to_owned(),
            file_name: format!("fatura-{invoice_id}.pdf"),
            mime_type: "application/pdf".to_owned(),
            bytes: b"%PDF-1.4 fake".to_vec(),
        })
    }

    async fn unblock(
        &self,
        _credentials: &BillingCredentials,
        customer_id: &str,
    ) -> Result<UnblockOutcome, BillingError> {
        self.unblocks.lock().await.push(customer_id.to_owned());
        Ok(UnblockOutcome::Unblocked { message: "Desbloqueio realizado com sucesso".to_owned() })
    }
}

#[derive(Default)]
pub struct FakeMedia {
    pub transcript: Option<String>,
    pub insight: Option<ImageInsight>,
}

#[async_trait]
impl MediaPreprocessor for FakeMedia {
    async fn transcribe(&self, _media: &MediaInput) -> Result<String> {
        self.transcript.clone().ok_or_else(|| anyhow!("transcription backend offline"))
    }

    async fn describe_image(&self, _media: &MediaInput) -> Result<ImageInsight> {
        self.insight.clone().ok_or_else(|| anyhow!("vision backend offline"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentText {
    pub instance: InstanceKey,
    pub to: String,
    pub text: String,
}

#[derive(Default)]
pub struct RecordingTransport {
    texts: Mutex<Vec<SentText>>,
    documents: Mutex<Vec<OutboundDocument>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub async fn texts(&self) -> Vec<SentText> {
        self.texts.lock().await.clone()
    }

    pub async fn documents(&self) -> Vec<OutboundDocument> {
        self.documents.lock().await.clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(
        &self,
        instance: &InstanceKey,
        to: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Connect("gateway offline".to_owned()));
        }
        self.texts.lock().await.push(SentText {
            instance: instance.clone(),
            to: to.to_owned(),
            text: text.to_owned(),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        _instance: &InstanceKey,
        _to: &str,
        document: OutboundDocument,
    ) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Connect("gateway offline".to_owned()));
        }
        self.documents.lock().await.push(document);
        Ok(())
    }
}

pub async fn seed_contact_message(
    store: &relaydesk_db::InMemoryStore,
    conversation_id: relaydesk_core::ConversationId,
    text: &str,
) {
    seed_message(store, conversation_id, relaydesk_core::SenderKind::Contact, text).await;
}

pub async fn seed_bot_message(
    store: &relaydesk_db::InMemoryStore,
    conversation_id: relaydesk_core::ConversationId,
    text: &str,
) {
    seed_message(store, conversation_id, relaydesk_core::SenderKind::Bot, text).await;
}

async fn seed_message(
    store: &relaydesk_db::InMemoryStore,
    conversation_id: relaydesk_core::ConversationId,
    sender: relaydesk_core::SenderKind,
    text: &str,
) {
    use relaydesk_db::repositories::MessageRepository;

    let mut message = relaydesk_core::NewMessage::text(conversation_id, sender, text);
    message.sent_at -= chrono::Duration::seconds(5);
    MessageRepository::append(store, message).await.expect("seed message");
}
