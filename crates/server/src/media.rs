//! Whisper-style transcription and vision-model image description.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use relaydesk_agent::llm::{ChatMessage, LlmClient};
use relaydesk_agent::{ImageInsight, MediaInput, MediaPreprocessor};
use relaydesk_core::config::{LlmConfig, LlmProvider, MediaConfig};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

const VISION_PROMPT: &str = "Descreva brevemente a imagem em português. Se houver produtos, \
embalagens ou nomes de medicamentos, liste-os como palavras-chave. Responda apenas com JSON no \
formato {\"description\": \"...\", \"keywords\": [\"...\"]}.";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct VisionPayload {
    #[serde(default)]
    description: String,
    #[serde(default)]
    keywords: Vec<String>,
}

pub struct HttpMediaPreprocessor {
    client: reqwest::Client,
    transcription_url: String,
    api_key: Option<SecretString>,
    model: String,
    language: String,
    vision: Arc<dyn LlmClient>,
}

impl HttpMediaPreprocessor {
    pub fn new(
        media: &MediaConfig,
        llm: &LlmConfig,
        vision: Arc<dyn LlmClient>,
    ) -> Result<Self> {
        let base = media
            .transcription_base_url
            .clone()
            .or_else(|| llm.base_url.clone())
            .unwrap_or_else(|| match llm.provider {
                LlmProvider::Ollama => "http://localhost:11434".to_owned(),
                _ => "https://api.openai.com/v1".to_owned(),
            });
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(llm.timeout_secs.max(1)))
            .build()
            .context("failed to build media HTTP client")?;
        Ok(Self {
            client,
            transcription_url: transcription_url(&base),
            api_key: llm.api_key.clone(),
            model: media.transcription_model.clone(),
            language: media.language.clone(),
            vision,
        })
    }

    async fn audio_bytes(&self, media: &MediaInput) -> Result<Vec<u8>> {
        if let Some(payload) = media.base64.as_deref().filter(|payload| !payload.is_empty()) {
            let payload = payload.split_once(";base64,").map_or(payload, |(_, data)| data);
            return STANDARD.decode(payload.trim()).context("audio payload is not valid base64");
        }
        let url = media
            .url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| anyhow!("audio has no payload"))?;
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

pub fn transcription_url(base: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if base.ends_with("/audio/transcriptions") {
        base.to_owned()
    } else if base.ends_with("/v1") {
        format!("{base}/audio/transcriptions")
    } else {
        format!("{base}/v1/audio/transcriptions")
    }
}

fn audio_file_name(mime_type: Option<&str>) -> &'static str {
    match mime_type.map(|mime| mime.split(';').next().unwrap_or(mime).trim()) {
        Some("audio/mpeg") | Some("audio/mp3") => "audio.mp3",
        Some("audio/mp4") | Some("audio/m4a") => "audio.m4a",
        Some("audio/wav") | Some("audio/x-wav") => "audio.wav",
        Some("audio/webm") => "audio.webm",
        _ => "audio.ogg",
    }
}

/// Reads the model's JSON answer, tolerating a fenced block or plain prose.
pub fn parse_vision_reply(reply: &str) -> ImageInsight {
    let trimmed = reply.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => "",
    };
    match serde_json::from_str::<VisionPayload>(candidate) {
        Ok(payload) => ImageInsight {
            description: payload.description.trim().to_owned(),
            keywords: payload
                .keywords
                .into_iter()
                .map(|keyword| keyword.trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        },
        Err(_) => ImageInsight { description: trimmed.to_owned(), keywords: Vec::new() },
    }
}

#[async_trait]
impl MediaPreprocessor for HttpMediaPreprocessor {
    async fn transcribe(&self, media: &MediaInput) -> Result<String> {
        let bytes = self.audio_bytes(media).await?;
        let mime = media.mime_type.clone().unwrap_or_else(|| "audio/ogg".to_owned());
        let part = Part::bytes(bytes)
            .file_name(audio_file_name(Some(&mime)))
            .mime_str(mime.split(';').next().unwrap_or("audio/ogg").trim())?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());
        let mut request = self.client.post(&self.transcription_url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "media.transcription.rejected",
                status = status.as_u16(),
                "transcription provider rejected audio"
            );
            bail!("transcription failed with HTTP {}: {body}", status.as_u16());
        }
        let transcript = response.json::<TranscriptionResponse>().await?.text.trim().to_owned();
        if transcript.is_empty() {
            bail!("transcription returned no text");
        }
        debug!(
            event_name = "media.transcription.completed",
            chars = transcript.len(),
            "audio transcribed"
        );
        Ok(transcript)
    }

    async fn describe_image(&self, media: &MediaInput) -> Result<ImageInsight> {
        let url = media.data_url().ok_or_else(|| anyhow!("image has no payload"))?;
        let reply = self.vision.complete(&[ChatMessage::user_with_image(VISION_PROMPT, url)]).await?;
        let insight = parse_vision_reply(&reply);
        debug!(
            event_name = "media.image.described",
            keywords = insight.keywords.len(),
            "image described"
        );
        Ok(insight)
    }
}
