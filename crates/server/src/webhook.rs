//! Gateway webhook intake: validates the event, registers the contact and
//! hands the turn to the orchestrator in the background. Contact metadata is
//! merged inside the turn, under the per-contact lock.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use relaydesk_agent::{ConversationOrchestrator, IncomingMessage, MediaInput, TurnOutcome};
use relaydesk_core::SenderKind;
use relaydesk_db::Repositories;
use relaydesk_transport::{parse_webhook, InboundEnvelope, SessionRegistry, WebhookEvent};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{error, info, warn};

pub const SECRET_HEADER: &str = "x-relaydesk-webhook-secret";

#[derive(Clone)]
pub struct WebhookState {
    pub repos: Repositories,
    pub registry: Arc<SessionRegistry>,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub secret: Option<SecretString>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(receive))
        .route("/webhook/{event}", post(receive))
        .with_state(state)
}

fn reply(status: StatusCode, body: Value) -> (StatusCode, Json<Value>) {
    (status, Json(body))
}

fn authorized(state: &WebhookState, headers: &HeaderMap) -> bool {
    let Some(secret) = &state.secret else {
        return true;
    };
    headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == secret.expose_secret())
}

pub async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&state, &headers) {
        warn!(event_name = "webhook.unauthorized", "webhook secret missing or wrong");
        return reply(StatusCode::UNAUTHORIZED, json!({"status": "unauthorized"}));
    }

    let envelope = match parse_webhook(&payload) {
        Ok(WebhookEvent::Message(envelope)) => envelope,
        Ok(WebhookEvent::Ignored(reason)) => {
            info!(event_name = "webhook.ignored", reason = reason.as_str(), "webhook event ignored");
            return reply(StatusCode::OK, json!({"status": "ignored", "reason": reason.as_str()}));
        }
        Err(error) => {
            warn!(event_name = "webhook.malformed", error = %error, "webhook payload rejected");
            return reply(
                StatusCode::BAD_REQUEST,
                json!({"status": "rejected", "error": error.to_string()}),
            );
        }
    };

    match accept(&state, envelope).await {
        Ok(Some(correlation_id)) => reply(
            StatusCode::ACCEPTED,
            json!({"status": "accepted", "correlationId": correlation_id}),
        ),
        Ok(None) => {
            reply(StatusCode::OK, json!({"status": "ignored", "reason": "unknown_instance"}))
        }
        Err(message) => {
            error!(event_name = "webhook.failed", error = %message, "webhook intake failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, json!({"status": "error", "error": message}))
        }
    }
}

/// Returns the correlation id of the spawned turn, or `None` for unknown instances.
async fn accept(state: &WebhookState, envelope: InboundEnvelope) -> Result<Option<String>, String> {
    let correlation_id = envelope.correlation_id().to_owned();
    let instance = match state.repos.workspaces.find_instance(&envelope.instance).await {
        Ok(Some(instance)) => instance,
        Ok(None) => {
            warn!(
                event_name = "webhook.unknown_instance",
                instance = %envelope.instance,
                correlation_id = %correlation_id,
                "message for unregistered instance"
            );
            return Ok(None);
        }
        Err(error) => return Err(error.to_string()),
    };

    let contact = state
        .repos
        .contacts
        .find_or_create(instance.workspace_id, &envelope.address)
        .await
        .map_err(|error| error.to_string())?;

    state.registry.open(&envelope.instance).await;

    let message = IncomingMessage {
        workspace_id: instance.workspace_id,
        contact_id: contact.id,
        instance: envelope.instance.clone(),
        text: envelope.text.clone(),
        origin_address: envelope.address.clone(),
        media: envelope.media.map(|media| MediaInput {
            kind: media.kind,
            url: media.url,
            base64: media.base64,
            mime_type: media.mime_type,
        }),
        correlation_id: correlation_id.clone(),
        sender: if envelope.from_me { SenderKind::Agent } else { SenderKind::Contact },
        push_name: envelope.push_name,
        network_id: envelope.network_id,
    };
    info!(
        event_name = "webhook.accepted",
        correlation_id = %correlation_id,
        contact_id = %contact.id,
        instance = %envelope.instance,
        from_me = envelope.from_me,
        "inbound message accepted"
    );

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let correlation_id = message.correlation_id.clone();
        match orchestrator.process_incoming_message(message).await {
            Ok(TurnOutcome::Replied { route, escalated, .. }) => info!(
                event_name = "turn.completed",
                correlation_id = %correlation_id,
                route = route.as_str(),
                escalated,
                "turn replied"
            ),
            Ok(outcome) => info!(
                event_name = "turn.completed",
                correlation_id = %correlation_id,
                outcome = ?outcome,
                "turn finished without reply"
            ),
            Err(error) => error!(
                event_name = "turn.failed",
                correlation_id = %correlation_id,
                error = %error,
                "turn failed"
            ),
        }
    });

    Ok(Some(correlation_id))
}
