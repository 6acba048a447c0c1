use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::workspace::WorkspaceId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactId(pub i64);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a contact in the operator pipeline.
///
/// Stored as a plain string. Parsing is the only way in, so legacy spellings are
/// normalized once at the persistence boundary and nowhere else.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KanbanStatus {
    NewContact,
    WaitingAttendant,
    Negotiating,
    /// A named seller column, stored as `seller_<label>`.
    Seller(String),
    Archived,
}

const SELLER_PREFIX: &str = "seller_";

impl KanbanStatus {
    pub fn as_str(&self) -> String {
        match self {
            Self::NewContact => "new_contact".to_owned(),
            Self::WaitingAttendant => "waiting_attendant".to_owned(),
            Self::Negotiating => "negotiating".to_owned(),
            Self::Seller(label) => format!("{SELLER_PREFIX}{label}"),
            Self::Archived => "archived".to_owned(),
        }
    }

    /// `waiting_attendant` and every seller column mean a human owns the thread.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::WaitingAttendant | Self::Seller(_))
    }
}

impl FromStr for KanbanStatus {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim().to_ascii_lowercase();
        match value.as_str() {
            "new_contact" => Ok(Self::NewContact),
            "waiting_attendant" => Ok(Self::WaitingAttendant),
            "negotiating" | "negociating" => Ok(Self::Negotiating),
            "archived" => Ok(Self::Archived),
            other => match other.strip_prefix(SELLER_PREFIX) {
                Some(label) if !label.is_empty() => Ok(Self::Seller(label.to_owned())),
                _ => Err(DomainError::UnknownStatus {
                    kind: "kanban status",
                    value: raw.to_owned(),
                }),
            },
        }
    }
}

impl TryFrom<String> for KanbanStatus {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KanbanStatus> for String {
    fn from(value: KanbanStatus) -> Self {
        value.as_str()
    }
}

impl fmt::Display for KanbanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

const DEACTIVATE_COMMANDS: &[&str] = &["#deactivate", "#desativar"];
const ACTIVATE_COMMANDS: &[&str] = &["#activate", "#ativar"];

/// The collaborator-mode value an operator command sets: `Some(true)` for
/// `#deactivate`/`#desativar`, `Some(false)` for `#activate`/`#ativar`.
pub fn collaborator_mode_command(text: &str) -> Option<bool> {
    let command = text.trim().to_lowercase();
    if DEACTIVATE_COMMANDS.contains(&command.as_str()) {
        Some(true)
    } else if ACTIVATE_COMMANDS.contains(&command.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Typed view over the contact's JSON metadata bag. Keys this type does not know
/// about survive a read-modify-write through `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMetadata {
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub collaborator_mode: bool,
    #[serde(default, rename = "whatsappLid", skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContactMetadata {
    /// Marks a new customer message: unread, plus whatever the gateway knew
    /// about the sender. Returns whether anything changed.
    pub fn record_inbound(&mut self, push_name: Option<&str>, network_id: Option<&str>) -> bool {
        let before = self.clone();
        self.unread = true;
        if let Some(push_name) = push_name {
            self.push_name = Some(push_name.to_owned());
        }
        if let Some(network_id) = network_id {
            self.network_id = Some(network_id.to_owned());
        }
        *self != before
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub workspace_id: WorkspaceId,
    pub address: String,
    pub name: Option<String>,
    pub status: KanbanStatus,
    pub metadata: ContactMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// True when no automated reply may be sent, whatever the message says.
    pub fn is_bot_silenced(&self) -> bool {
        self.metadata.collaborator_mode || self.status.is_silent()
    }

    pub fn first_name(&self) -> Option<String> {
        self.name.as_deref().and_then(capitalized_first_name)
    }
}

pub fn capitalized_first_name(raw: &str) -> Option<String> {
    let first = raw.split_whitespace().next()?;
    let mut chars = first.chars();
    let head = chars.next()?;
    let mut name: String = head.to_uppercase().collect();
    name.push_str(&chars.as_str().to_lowercase());
    Some(name)
}
