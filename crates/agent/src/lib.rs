//! Conversation engine - decides what the bot says to each inbound message
//!
//! This crate holds the decision logic behind the relaydesk responder:
//! - Scripted dialogue (greeting, name capture, menus, unblock confirmation)
//! - Billing intent classification and the billing lookup flow
//! - Catalog keyword matching, ranking and pagination
//! - The LLM-backed reply with catalog context
//! - Escalation to a human operator
//!
//! # Architecture
//!
//! Every inbound message goes through one [`orchestrator::ConversationOrchestrator`]
//! turn, serialized per contact:
//! 1. **Gatekeeping** - operator commands and silence rules
//! 2. **Scripted flow** (`scripted`) - replies driven by the persisted dialogue state
//! 3. **Billing** (`intent`, `billing`) - invoice lookup and unblock through the ERP
//! 4. **AI flow** (`catalog`, `ai_flow`) - model reply grounded on ranked products
//! 5. **Escalation** (`escalation`) - hand off to a human, at most once
//!
//! The model only phrases answers. Prices, menus, billing results and handoff
//! decisions are deterministic.

pub mod ai_flow;
pub mod billing;
pub mod calls;
pub mod catalog;
pub mod detectors;
pub mod document;
pub mod escalation;
pub mod intent;
pub mod llm;
pub mod media;
pub mod orchestrator;
pub mod rules;
pub mod scripted;

#[cfg(test)]
mod testing;

pub use ai_flow::{AiOutcome, AiResponder};
pub use billing::{BillingError, BillingFlow, BillingGateway};
pub use calls::CallError;
pub use catalog::CatalogMatcher;
pub use escalation::{EscalationDecision, EscalationPolicy, EscalationReason};
pub use intent::{Intent, IntentClassifier, IntentMatch};
pub use llm::{ChatContent, ChatMessage, ChatRole, ContentPart, LlmClient};
pub use media::{ImageInsight, MediaInput, MediaPreprocessor};
pub use orchestrator::{
    Collaborators, ConversationOrchestrator, IncomingMessage, Route, SilentReason, TurnOutcome,
};
pub use rules::Thresholds;
pub use scripted::ScriptedFlowResolver;
