use async_trait::async_trait;
use thiserror::Error;

use crate::domain::workspace::InstanceKey;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("chat session `{0}` is unavailable")]
    SessionUnavailable(String),
    #[error("chat session channel closed")]
    ChannelClosed,
}

impl TransportError {
    /// Connection-class failures end the session actor so its supervisor can restart it.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::Connect(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::Send(_) | Self::SessionUnavailable(_) | Self::ChannelClosed => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundDocument {
    pub file_name: String,
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
    pub caption: Option<String>,
}

/// Outbound side of the chat transport, addressed by instance key.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(
        &self,
        instance: &InstanceKey,
        to: &str,
        text: &str,
    ) -> Result<(), TransportError>;

    async fn send_document(
        &self,
        instance: &InstanceKey,
        to: &str,
        document: OutboundDocument,
    ) -> Result<(), TransportError>;
}
