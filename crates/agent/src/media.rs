use anyhow::Result;
use async_trait::async_trait;
use relaydesk_core::MessageKind;

/// Stored as the transcript when an audio message cannot be transcribed.
pub const AUDIO_FAILURE_TEXT: &str = "[Áudio recebido mas não pôde ser transcrito]";

/// Text the decision logic sees for an untranscribable audio turn.
pub const AUDIO_FAILURE_DECISION_TEXT: &str = "oi";

/// Media attached to an inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaInput {
    pub kind: MessageKind,
    pub url: Option<String>,
    /// Inline payload delivered by the gateway, without a `data:` prefix.
    pub base64: Option<String>,
    pub mime_type: Option<String>,
}

impl MediaInput {
    /// URL the vision model can fetch: a `data:` URL for inline payloads,
    /// otherwise the remote URL.
    pub fn data_url(&self) -> Option<String> {
        match (&self.base64, &self.url) {
            (Some(payload), _) if !payload.is_empty() => {
                let mime = self.mime_type.as_deref().unwrap_or(match self.kind {
                    MessageKind::Audio => "audio/ogg",
                    _ => "image/jpeg",
                });
                Some(format!("data:{mime};base64,{payload}"))
            }
            (_, Some(url)) if !url.is_empty() => Some(url.clone()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageInsight {
    pub description: String,
    /// Extra catalog search terms seen in the image.
    pub keywords: Vec<String>,
}

/// Speech-to-text and vision collaborators used before the decision logic.
#[async_trait]
pub trait MediaPreprocessor: Send + Sync {
    async fn transcribe(&self, media: &MediaInput) -> Result<String>;
    async fn describe_image(&self, media: &MediaInput) -> Result<ImageInsight>;
}
