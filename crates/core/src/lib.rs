pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod text;
pub mod transport;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
pub use domain::billing::{BillingCredentials, Invoice, TaxDocument, UnblockOutcome};
pub use domain::bot_config::{BotConfig, TransferRule, TransferSignal};
pub use domain::contact::{Contact, ContactId, ContactMetadata, KanbanStatus};
pub use domain::conversation::{Conversation, ConversationId, ConversationStatus};
pub use domain::message::{Message, MessageId, MessageKind, NewMessage, SenderKind};
pub use domain::product::{Product, ProductId};
pub use domain::workspace::{ChatInstance, InstanceKey, Workspace, WorkspaceId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{Awaiting, BillingAction, DialogueEvent, DialogueState, FlowEngine};
pub use transport::{OutboundDocument, Transport, TransportError};
