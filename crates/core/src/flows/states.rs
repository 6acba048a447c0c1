use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingAction {
    Inquiry,
    Unblock,
}

/// What the bot asked for in its last scripted reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "action", rename_all = "snake_case")]
pub enum Awaiting {
    #[default]
    None,
    Name,
    Document(BillingAction),
    UnblockConfirmation,
}

/// Dialogue cursor persisted per conversation and written in the same
/// transaction as each bot reply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueState {
    #[serde(default)]
    pub awaiting: Awaiting,
    /// Highest 1-based catalog item number already shown to the contact.
    #[serde(default)]
    pub last_list_index: Option<u32>,
    #[serde(default)]
    pub automated_reply_count: u32,
    /// Last taxpayer document the contact supplied.
    #[serde(default)]
    pub known_document: Option<String>,
}

impl DialogueState {
    pub fn is_first_contact(&self) -> bool {
        self.automated_reply_count == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueEvent {
    GreetingSent,
    NameCaptured,
    ExpectationDropped,
    DocumentRequested(BillingAction),
    DocumentSupplied(String),
    UnblockOffered,
    UnblockAnswered,
    CatalogListed { last_index: u32 },
    CatalogReset,
    HandedOff,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: Awaiting,
    pub to: Awaiting,
    pub event: DialogueEvent,
    pub state: DialogueState,
}
