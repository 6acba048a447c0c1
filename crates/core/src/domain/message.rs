use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Contact,
    Bot,
    Agent,
}

impl SenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Bot => "bot",
            Self::Agent => "agent",
        }
    }
}

impl FromStr for SenderKind {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "contact" => Ok(Self::Contact),
            "bot" => Ok(Self::Bot),
            "agent" => Ok(Self::Agent),
            _ => Err(DomainError::UnknownStatus { kind: "sender kind", value: raw.to_owned() }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Audio,
    Image,
    Video,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
        }
    }

    /// Maps a transport media type or MIME type onto a message kind.
    pub fn from_media_type(media_type: Option<&str>) -> Self {
        let Some(media_type) = media_type else {
            return Self::Text;
        };
        let lowered = media_type.to_ascii_lowercase();
        if lowered.starts_with("audio") || lowered.contains("ptt") {
            Self::Audio
        } else if lowered.starts_with("image") {
            Self::Image
        } else if lowered.starts_with("video") {
            Self::Video
        } else if lowered.starts_with("application") || lowered.starts_with("document") {
            Self::Document
        } else {
            Self::Text
        }
    }
}

impl FromStr for MessageKind {
    type Err = DomainError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "text" => Ok(Self::Text),
            "audio" => Ok(Self::Audio),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "document" => Ok(Self::Document),
            _ => Err(DomainError::UnknownStatus { kind: "message kind", value: raw.to_owned() }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: SenderKind,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender: SenderKind,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn text(
        conversation_id: ConversationId,
        sender: SenderKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            sender,
            content: content.into(),
            kind: MessageKind::Text,
            media_url: None,
            sent_at: Utc::now(),
        }
    }
}
