//! HTTP client for the Evolution-style chat gateway.
//!
//! Only the calls the engine needs are covered: plain text, document media and
//! the instance connection state.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use relaydesk_core::config::TransportConfig;
use relaydesk_core::domain::workspace::InstanceKey;
use relaydesk_core::transport::{OutboundDocument, TransportError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Connecting,
    Closed,
    Unknown(String),
}

impl ConnectionState {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" | "connected" => Self::Open,
            "connecting" => Self::Connecting,
            "close" | "closed" | "disconnected" => Self::Closed,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

/// Gateway operations a session actor drives.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_text(
        &self,
        instance: &InstanceKey,
        number: &str,
        text: &str,
    ) -> Result<(), TransportError>;

    async fn send_media(
        &self,
        instance: &InstanceKey,
        number: &str,
        document: &OutboundDocument,
    ) -> Result<(), TransportError>;

    async fn connection_state(
        &self,
        instance: &InstanceKey,
    ) -> Result<ConnectionState, TransportError>;
}

#[derive(Debug, Clone)]
pub struct EvolutionClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionStateBody {
    #[serde(default)]
    instance: Option<ConnectionStateInstance>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionStateInstance {
    #[serde(default)]
    state: Option<String>,
}

impl EvolutionClient {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(config.api_key.expose_secret())
                .map_err(|e| TransportError::Connect(format!("invalid api key header: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::Connect(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url: config.api_url.trim_end_matches('/').to_owned() })
    }

    async fn post(
        &self,
        path: String,
        body: serde_json::Value,
    ) -> Result<(), TransportError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        debug!(status = %status, path = %path, "gateway response received");
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected { status: status.as_u16(), body })
    }
}

fn request_error(error: reqwest::Error) -> TransportError {
    if error.is_connect() || error.is_timeout() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Send(error.to_string())
    }
}

/// Digits only, with the Brazilian country code added to bare national numbers.
pub fn gateway_number(address: &str) -> String {
    let local = address.split('@').next().unwrap_or(address);
    let digits: String = local.chars().filter(char::is_ascii_digit).collect();
    if digits.len() <= 11 {
        format!("55{digits}")
    } else {
        digits
    }
}

#[async_trait]
impl ChatApi for EvolutionClient {
    async fn send_text(
        &self,
        instance: &InstanceKey,
        number: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        self.post(
            format!("/message/sendText/{instance}"),
            json!({ "number": gateway_number(number), "text": text }),
        )
        .await
    }

    async fn send_media(
        &self,
        instance: &InstanceKey,
        number: &str,
        document: &OutboundDocument,
    ) -> Result<(), TransportError> {
        self.post(
            format!("/message/sendMedia/{instance}"),
            json!({
                "number": gateway_number(number),
                "mediatype": "document",
                "mimetype": document.mime_type,
                "media": document.data,
                "fileName": document.file_name,
                "caption": document.caption,
            }),
        )
        .await
    }

    async fn connection_state(
        &self,
        instance: &InstanceKey,
    ) -> Result<ConnectionState, TransportError> {
        let response = self
            .client
            .get(format!("{}/instance/connectionState/{instance}", self.base_url))
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected { status: status.as_u16(), body });
        }

        let body: ConnectionStateBody = response
            .json()
            .await
            .map_err(|e| TransportError::Send(format!("invalid connection state body: {e}")))?;
        let raw = body.instance.and_then(|instance| instance.state).or(body.state);
        Ok(raw.map_or(ConnectionState::Unknown(String::new()), |state| {
            ConnectionState::parse(&state)
        }))
    }
}
