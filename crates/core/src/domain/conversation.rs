use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::contact::ContactId;
use crate::domain::workspace::WorkspaceId;
use crate::errors::DomainError;
use crate::flows::DialogueState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    BotHandling,
    PendingHuman,
    InProgress,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BotHandling => "bot_handling",
            Self::PendingHuman => "pending_human",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl FromStr for ConversationStatus {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bot_handling" => Ok(Self::BotHandling),
            "pending_human" => Ok(Self::PendingHuman),
            "in_progress" => Ok(Self::InProgress),
            "closed" => Ok(Self::Closed),
            _ => Err(DomainError::UnknownStatus {
                kind: "conversation status",
                value: raw.to_owned(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub workspace_id: WorkspaceId,
    pub contact_id: ContactId,
    pub status: ConversationStatus,
    /// `None` for rows written before the dialogue state column existed.
    pub dialogue: Option<DialogueState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
