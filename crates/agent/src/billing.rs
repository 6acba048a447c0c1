//! Billing adapter flow: customer lookup, overdue invoice summary with
//! statements, and the trust unblock action against the back-office system.
//!
//! Every outcome, including configuration gaps and lookup misses, yields an
//! [`AuditEvent`] next to the customer-facing text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::NaiveDate;
use relaydesk_core::domain::billing::{BillingCustomer, Statement};
use relaydesk_core::domain::product::format_brl;
use relaydesk_core::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, BillingAction, BillingCredentials,
    DialogueEvent, Invoice, OutboundDocument, TaxDocument, UnblockOutcome,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::calls::bounded;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billing integration is not configured for this workspace")]
    NotConfigured,
    #[error("billing request failed: {0}")]
    Http(String),
    #[error("billing system rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("billing response could not be decoded: {0}")]
    Decode(String),
    #[error("billing request timed out")]
    Timeout,
}

/// Back-office billing system as seen by the engine.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn find_customer_by_document(
        &self,
        credentials: &BillingCredentials,
        document: &TaxDocument,
    ) -> Result<Option<BillingCustomer>, BillingError>;

    async fn find_customer_by_phone(
        &self,
        credentials: &BillingCredentials,
        phone: &str,
    ) -> Result<Option<BillingCustomer>, BillingError>;

    async fn open_invoices(
        &self,
        credentials: &BillingCredentials,
        customer_id: &str,
    ) -> Result<Vec<Invoice>, BillingError>;

    async fn statement(
        &self,
        credentials: &BillingCredentials,
        invoice_id: &str,
    ) -> Result<Statement, BillingError>;

    async fn unblock(
        &self,
        credentials: &BillingCredentials,
        customer_id: &str,
    ) -> Result<UnblockOutcome, BillingError>;
}

pub const NOT_CONFIGURED_INQUIRY: &str = "Não consigo consultar suas faturas automaticamente \
agora. Um atendente humano vai verificar e te confirmar em breve. 🙏";
pub const NOT_CONFIGURED_UNBLOCK: &str = "Não consigo fazer o desbloqueio automaticamente \
agora. Um atendente humano vai verificar e te confirmar em breve. 🙏";
pub const CUSTOMER_NOT_FOUND: &str = "Não encontrei seu cadastro em nosso sistema. Por favor, \
verifique se o número está correto ou entre em contato com o suporte.";
pub const INQUIRY_FAILED: &str = "Desculpe, ocorreu um erro ao consultar suas faturas. Por favor, \
tente novamente mais tarde ou entre em contato com o suporte.";
pub const UNBLOCK_FAILED: &str = "Desculpe, ocorreu um erro ao processar o desbloqueio. Por \
favor, entre em contato com o suporte.";
pub const ASK_DOCUMENT_INQUIRY: &str = "Para consultar suas faturas em aberto, preciso do CPF ou \
CNPJ do titular da conta.\n\nPor favor, informe o CPF ou CNPJ:";
pub const ASK_DOCUMENT_UNBLOCK: &str = "Para realizar o desbloqueio, preciso do CPF ou CNPJ do \
titular da conta. Por favor, informe o CPF ou CNPJ:";

/// A billing action the dialogue decided to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BillingRequest {
    pub action: BillingAction,
    pub document: Option<TaxDocument>,
    /// Dialogue events that led here; the flow appends its own.
    pub events: Vec<DialogueEvent>,
}

impl BillingRequest {
    pub fn new(action: BillingAction, document: Option<TaxDocument>) -> Self {
        Self { action, document, events: Vec::new() }
    }

    pub fn with_events(mut self, events: Vec<DialogueEvent>) -> Self {
        self.events = events;
        self
    }
}

/// Who is asking and against which back office.
#[derive(Clone, Debug)]
pub struct BillingContext<'a> {
    pub credentials: Option<BillingCredentials>,
    pub phone: &'a str,
    pub audit: &'a AuditContext,
    pub today: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BillingReply {
    pub text: String,
    pub attachments: Vec<OutboundDocument>,
    pub events: Vec<DialogueEvent>,
    pub audit: Vec<AuditEvent>,
}

impl BillingReply {
    fn text(text: impl Into<String>, events: Vec<DialogueEvent>) -> Self {
        Self { text: text.into(), attachments: Vec::new(), events, audit: Vec::new() }
    }

    fn audited(mut self, event: AuditEvent) -> Self {
        self.audit.push(event);
        self
    }
}

#[derive(Clone)]
pub struct BillingFlow {
    gateway: Arc<dyn BillingGateway>,
    call_timeout: Duration,
}

impl BillingFlow {
    pub fn new(gateway: Arc<dyn BillingGateway>, call_timeout: Duration) -> Self {
        Self { gateway, call_timeout }
    }

    pub async fn run(&self, context: BillingContext<'_>, request: BillingRequest) -> BillingReply {
        let event_type = match request.action {
            BillingAction::Inquiry => "billing.inquiry",
            BillingAction::Unblock => "billing.unblock",
        };
        let mut events = request.events;

        let Some(credentials) = context.credentials.as_ref() else {
            let text = match request.action {
                BillingAction::Inquiry => NOT_CONFIGURED_INQUIRY,
                BillingAction::Unblock => NOT_CONFIGURED_UNBLOCK,
            };
            return BillingReply::text(text, events).audited(
                context
                    .audit
                    .event(event_type, AuditCategory::Billing, AuditOutcome::Failed)
                    .with_metadata("detail", BillingError::NotConfigured.to_string()),
            );
        };

        let customer = self.lookup(credentials, request.document.as_ref(), context.phone).await;
        let Some(customer) = customer else {
            if request.document.is_none() {
                let text = match request.action {
                    BillingAction::Inquiry => ASK_DOCUMENT_INQUIRY,
                    BillingAction::Unblock => ASK_DOCUMENT_UNBLOCK,
                };
                events.push(DialogueEvent::DocumentRequested(request.action));
                return BillingReply::text(text, events).audited(
                    context
                        .audit
                        .event(event_type, AuditCategory::Billing, AuditOutcome::Rejected)
                        .with_metadata("detail", "no customer for phone; document requested"),
                );
            }
            return BillingReply::text(CUSTOMER_NOT_FOUND, events).audited(
                context
                    .audit
                    .event(event_type, AuditCategory::Billing, AuditOutcome::Rejected)
                    .with_metadata("detail", "customer not found"),
            );
        };

        match request.action {
            BillingAction::Inquiry => self.inquiry(credentials, &context, &customer, events).await,
            BillingAction::Unblock => self.unblock(credentials, &context, &customer, events).await,
        }
    }

    async fn lookup(
        &self,
        credentials: &BillingCredentials,
        document: Option<&TaxDocument>,
        phone: &str,
    ) -> Option<BillingCustomer> {
        if let Some(document) = document {
            let found = bounded(
                "billing.find_customer_by_document",
                self.call_timeout,
                self.gateway.find_customer_by_document(credentials, document),
            )
            .await;
            match found {
                Ok(Some(customer)) => return Some(customer),
                Ok(None) => debug!(
                    event_name = "agent.billing.lookup_miss",
                    by = "document",
                    "no billing customer for document"
                ),
                Err(error) => warn!(
                    event_name = "agent.billing.lookup_failed",
                    by = "document",
                    error = %error,
                    "billing lookup by document failed"
                ),
            }
        }

        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return None;
        }
        match bounded(
            "billing.find_customer_by_phone",
            self.call_timeout,
            self.gateway.find_customer_by_phone(credentials, &digits),
        )
        .await
        {
            Ok(customer) => customer,
            Err(error) => {
                warn!(
                    event_name = "agent.billing.lookup_failed",
                    by = "phone",
                    error = %error,
                    "billing lookup by phone failed"
                );
                None
            }
        }
    }

    async fn inquiry(
        &self,
        credentials: &BillingCredentials,
        context: &BillingContext<'_>,
        customer: &BillingCustomer,
        mut events: Vec<DialogueEvent>,
    ) -> BillingReply {
        let invoices = match bounded(
            "billing.open_invoices",
            self.call_timeout,
            self.gateway.open_invoices(credentials, &customer.id),
        )
        .await
        {
            Ok(invoices) => invoices,
            Err(error) => {
                warn!(
                    event_name = "agent.billing.inquiry_failed",
                    customer_id = %customer.id,
                    error = %error,
                    "open invoice lookup failed"
                );
                return BillingReply::text(INQUIRY_FAILED, events).audited(
                    context
                        .audit
                        .event("billing.inquiry", AuditCategory::Billing, AuditOutcome::Failed)
                        .with_metadata("customer_id", customer.id.clone())
                        .with_metadata("detail", error.to_string()),
                );
            }
        };

        let overdue: Vec<&Invoice> =
            invoices.iter().filter(|invoice| invoice.is_overdue(context.today)).collect();
        let summary = context
            .audit
            .event("billing.inquiry", AuditCategory::Billing, AuditOutcome::Success)
            .with_metadata("customer_id", customer.id.clone())
            .with_metadata("detail", format!("{} overdue invoice(s)", overdue.len()));

        if overdue.is_empty() {
            let text = format!(
                "Olá {}! 😊\n\nConsultei seu cadastro e não há faturas em aberto no momento. \
                 Você está em dia com seus pagamentos! ✅",
                customer.name
            );
            return BillingReply::text(text, events).audited(summary);
        }

        let mut reply = BillingReply::text(overdue_summary(&customer.name, &overdue), Vec::new())
            .audited(summary);
        for invoice in overdue {
            let statement = bounded(
                "billing.statement",
                self.call_timeout,
                self.gateway.statement(credentials, &invoice.id),
            )
            .await;
            let event =
                context.audit.event("billing.statement", AuditCategory::Billing, AuditOutcome::Success);
            match statement {
                Ok(statement) => {
                    reply.attachments.push(OutboundDocument {
                        file_name: statement.file_name,
                        mime_type: statement.mime_type,
                        data: STANDARD.encode(&statement.bytes),
                        caption: Some(format!("Boleto da fatura {}", invoice.id)),
                    });
                    reply.audit.push(event.with_metadata("invoice_id", invoice.id.clone()));
                }
                Err(error) => {
                    warn!(
                        event_name = "agent.billing.statement_failed",
                        invoice_id = %invoice.id,
                        error = %error,
                        "statement download failed"
                    );
                    let mut failed = event
                        .with_metadata("invoice_id", invoice.id.clone())
                        .with_metadata("detail", error.to_string());
                    failed.outcome = AuditOutcome::Failed;
                    reply.audit.push(failed);
                }
            }
        }

        events.push(DialogueEvent::UnblockOffered);
        reply.events = events;
        reply
    }

    async fn unblock(
        &self,
        credentials: &BillingCredentials,
        context: &BillingContext<'_>,
        customer: &BillingCustomer,
        events: Vec<DialogueEvent>,
    ) -> BillingReply {
        let outcome = bounded(
            "billing.unblock",
            self.call_timeout,
            self.gateway.unblock(credentials, &customer.id),
        )
        .await;
        let event = |outcome: AuditOutcome, detail: &str| {
            context
                .audit
                .event("billing.unblock", AuditCategory::Billing, outcome)
                .with_metadata("customer_id", customer.id.clone())
                .with_metadata("detail", detail.to_owned())
        };

        match outcome {
            Ok(UnblockOutcome::Unblocked { message })
            | Ok(UnblockOutcome::AlreadyReleased { message }) => {
                let text = format!(
                    "✅ {message}\n\n{}, seu acesso foi liberado! 🎉\n\nLembre-se de regularizar \
                     seus pagamentos o quanto antes para evitar novos bloqueios.\n\nPrecisa de \
                     mais alguma ajuda? 😊",
                    customer.name
                );
                BillingReply::text(text, events).audited(event(AuditOutcome::Success, &message))
            }
            Ok(UnblockOutcome::Failed { message }) => {
                let text = format!(
                    "❌ Não foi possível realizar o desbloqueio.\n\n{message}\n\nPor favor, entre \
                     em contato com o suporte para mais informações."
                );
                BillingReply::text(text, events).audited(event(AuditOutcome::Rejected, &message))
            }
            Err(error) => {
                warn!(
                    event_name = "agent.billing.unblock_failed",
                    customer_id = %customer.id,
                    error = %error,
                    "unblock call failed"
                );
                BillingReply::text(UNBLOCK_FAILED, events)
                    .audited(event(AuditOutcome::Failed, &error.to_string()))
            }
        }
    }
}

fn overdue_summary(customer_name: &str, overdue: &[&Invoice]) -> String {
    let noun = if overdue.len() == 1 { "fatura em aberto" } else { "faturas em aberto" };
    let mut text = format!("Olá {customer_name}! 📋\n\nEncontrei {} {noun}:\n\n", overdue.len());
    for (index, invoice) in overdue.iter().enumerate() {
        text.push_str(&format!("{}. ⚠️ VENCIDA\n", index + 1));
        text.push_str(&format!("   💰 Valor: {}\n", format_brl(invoice.amount_cents)));
        text.push_str(&format!("   📆 Vencimento: {}\n", invoice.due_date.format("%d/%m/%Y")));
        if let Some(number) = &invoice.document_number {
            text.push_str(&format!("   📄 Documento: {number}\n"));
        }
        if let Some(reference) = &invoice.payment_reference {
            text.push_str(&format!("   🔑 Linha digitável: {reference}\n"));
        }
        text.push('\n');
    }
    text.push_str(
        "Você deseja realizar o desbloqueio de confiança enquanto regulariza o pagamento? \
         Responda *sim* ou *não*.",
    );
    text
}
