use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use relaydesk_core::domain::contact::collaborator_mode_command;
use relaydesk_core::domain::message::MessageKind;
use relaydesk_core::domain::workspace::InstanceKey;

/// A chat message lifted out of a gateway webhook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEnvelope {
    pub instance: InstanceKey,
    /// Chat address the reply goes back to (phone digits).
    pub address: String,
    pub remote_jid: String,
    /// Set when the sender was identified by a network-private id (`@lid`).
    pub network_id: Option<String>,
    pub message_id: Option<String>,
    pub text: String,
    pub push_name: Option<String>,
    pub media: Option<InboundMedia>,
    /// Sent from the business account itself: an operator command.
    pub from_me: bool,
}

impl InboundEnvelope {
    /// Message id when the gateway sent one, otherwise the sender address.
    pub fn correlation_id(&self) -> &str {
        self.message_id.as_deref().unwrap_or(&self.remote_jid)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMedia {
    pub kind: MessageKind,
    pub url: Option<String>,
    pub base64: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgnoredReason {
    UnsupportedEvent(String),
    FromMe,
    Group,
    Broadcast,
    MissingSender,
    Empty,
}

impl IgnoredReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedEvent(_) => "unsupported_event",
            Self::FromMe => "from_me",
            Self::Group => "group",
            Self::Broadcast => "broadcast",
            Self::MissingSender => "missing_sender",
            Self::Empty => "empty",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    Message(InboundEnvelope),
    Ignored(IgnoredReason),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct Payload {
    event: String,
    #[serde(default)]
    instance: Option<String>,
    #[serde(default)]
    data: Option<MessageData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageData {
    #[serde(default)]
    key: MessageKey,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    push_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageKey {
    #[serde(default)]
    remote_jid: Option<String>,
    #[serde(default)]
    from_me: bool,
    #[serde(default)]
    id: Option<String>,
    /// Phone-number jid the gateway resolved for `@lid` senders.
    #[serde(default, alias = "senderPn")]
    remote_jid_alt: Option<String>,
}

const MEDIA_NODES: &[(&str, MessageKind)] = &[
    ("audioMessage", MessageKind::Audio),
    ("imageMessage", MessageKind::Image),
    ("videoMessage", MessageKind::Video),
    ("documentMessage", MessageKind::Document),
];

fn string_at<'a>(node: &'a Value, pointer: &str) -> Option<&'a str> {
    node.pointer(pointer).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
}

fn extract_media(message: &Value) -> Option<InboundMedia> {
    MEDIA_NODES.iter().find_map(|(node, kind)| {
        let media = message.get(*node)?;
        let base64 = string_at(media, "/base64")
            .or_else(|| string_at(media, "/data"))
            .or_else(|| string_at(message, "/base64"));
        Some(InboundMedia {
            kind: *kind,
            url: string_at(media, "/url")
                .or_else(|| string_at(media, "/mediaUrl"))
                .map(str::to_owned),
            base64: base64.map(str::to_owned),
            mime_type: string_at(media, "/mimetype").map(str::to_owned),
        })
    })
}

fn extract_text(message: &Value) -> String {
    [
        "/conversation",
        "/extendedTextMessage/text",
        "/imageMessage/caption",
        "/videoMessage/caption",
        "/documentMessage/caption",
    ]
    .iter()
    .find_map(|pointer| string_at(message, pointer))
    .unwrap_or_default()
    .trim()
    .to_owned()
}

fn local_part(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

/// Parses a gateway webhook body. Anything other than a new customer message or
/// an operator command sent from the business account comes back as
/// [`WebhookEvent::Ignored`].
pub fn parse_webhook(body: &Value) -> Result<WebhookEvent, WebhookError> {
    let payload: Payload = serde_json::from_value(body.clone())
        .map_err(|error| WebhookError::Malformed(error.to_string()))?;

    if !payload.event.eq_ignore_ascii_case("messages.upsert")
        && payload.event != "MESSAGES_UPSERT"
    {
        return Ok(WebhookEvent::Ignored(IgnoredReason::UnsupportedEvent(payload.event)));
    }

    let instance = payload
        .instance
        .filter(|instance| !instance.trim().is_empty())
        .ok_or_else(|| WebhookError::Malformed("missing instance".to_owned()))?;
    let data = payload.data.unwrap_or_default();

    let from_me = data.key.from_me;
    let Some(remote_jid) = data.key.remote_jid.filter(|jid| !jid.is_empty()) else {
        return Ok(WebhookEvent::Ignored(IgnoredReason::MissingSender));
    };
    if remote_jid.ends_with("@g.us") {
        return Ok(WebhookEvent::Ignored(IgnoredReason::Group));
    }
    if remote_jid.ends_with("@broadcast") || remote_jid.ends_with("@newsletter") {
        return Ok(WebhookEvent::Ignored(IgnoredReason::Broadcast));
    }

    let message = data.message.unwrap_or(Value::Null);
    let text = extract_text(&message);
    let media = extract_media(&message);
    if from_me && collaborator_mode_command(&text).is_none() {
        return Ok(WebhookEvent::Ignored(IgnoredReason::FromMe));
    }
    if text.is_empty() && media.is_none() {
        return Ok(WebhookEvent::Ignored(IgnoredReason::Empty));
    }

    let is_lid = remote_jid.ends_with("@lid");
    let address = match (&data.key.remote_jid_alt, is_lid) {
        (Some(alt), true) => local_part(alt).to_owned(),
        _ => local_part(&remote_jid).to_owned(),
    };

    Ok(WebhookEvent::Message(InboundEnvelope {
        instance: InstanceKey(instance),
        address,
        network_id: is_lid.then(|| remote_jid.clone()),
        remote_jid,
        message_id: data.key.id,
        text,
        // On own messages the push name is the business account's.
        push_name: data.push_name.filter(|name| !from_me && !name.trim().is_empty()),
        media: if from_me { None } else { media },
        from_me,
    }))
}

#[cfg(test)]
mod tests {
    use relaydesk_core::domain::message::MessageKind;
    use serde_json::{json, Value};

    use super::{parse_webhook, IgnoredReason, WebhookError, WebhookEvent};

    fn upsert(key: Value, message: Value) -> Value {
        json!({
            "event": "messages.upsert",
            "instance": "loja-1",
            "data": { "key": key, "message": message, "pushName": "Maria Souza" }
        })
    }

    fn ignored(body: Value) -> IgnoredReason {
        match parse_webhook(&body).expect("parse") {
            WebhookEvent::Ignored(reason) => reason,
            WebhookEvent::Message(envelope) => panic!("expected ignore, got {envelope:?}"),
        }
    }

    #[test]
    fn plain_conversation_message_is_extracted() {
        let body = upsert(
            json!({"remoteJid": "5511987654321@s.whatsapp.net", "fromMe": false, "id": "WAMID1"}),
            json!({"conversation": "tem amoxicilina?"}),
        );
        let WebhookEvent::Message(envelope) = parse_webhook(&body).expect("parse") else {
            panic!("expected message");
        };
        assert_eq!(envelope.instance.0, "loja-1");
        assert_eq!(envelope.address, "5511987654321");
        assert_eq!(envelope.text, "tem amoxicilina?");
        assert_eq!(envelope.push_name.as_deref(), Some("Maria Souza"));
        assert_eq!(envelope.correlation_id(), "WAMID1");
        assert!(envelope.media.is_none());
        assert!(envelope.network_id.is_none());
        assert!(!envelope.from_me);
    }

    #[test]
    fn extended_text_and_uppercase_event_name_are_accepted() {
        let mut body = upsert(
            json!({"remoteJid": "5511987654321@s.whatsapp.net"}),
            json!({"extendedTextMessage": {"text": "quero pagar minha fatura"}}),
        );
        body["event"] = json!("MESSAGES_UPSERT");
        let WebhookEvent::Message(envelope) = parse_webhook(&body).expect("parse") else {
            panic!("expected message");
        };
        assert_eq!(envelope.text, "quero pagar minha fatura");
    }

    #[test]
    fn image_caption_and_inline_media_are_kept() {
        let body = upsert(
            json!({"remoteJid": "5511987654321@s.whatsapp.net"}),
            json!({
                "imageMessage": {"caption": "tem esse?", "mimetype": "image/jpeg", "url": "https://mmg/x"},
                "base64": "/9j/4AAQ"
            }),
        );
        let WebhookEvent::Message(envelope) = parse_webhook(&body).expect("parse") else {
            panic!("expected message");
        };
        let media = envelope.media.expect("media");
        assert_eq!(envelope.text, "tem esse?");
        assert_eq!(media.kind, MessageKind::Image);
        assert_eq!(media.base64.as_deref(), Some("/9j/4AAQ"));
        assert_eq!(media.mime_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn audio_without_caption_is_not_empty() {
        let body = upsert(
            json!({"remoteJid": "5511987654321@s.whatsapp.net"}),
            json!({"audioMessage": {"mimetype": "audio/ogg; codecs=opus", "base64": "T2dn"}}),
        );
        let WebhookEvent::Message(envelope) = parse_webhook(&body).expect("parse") else {
            panic!("expected message");
        };
        assert!(envelope.text.is_empty());
        assert_eq!(envelope.media.map(|media| media.kind), Some(MessageKind::Audio));
    }

    #[test]
    fn lid_senders_resolve_to_alternate_number() {
        let body = upsert(
            json!({"remoteJid": "209876543210987@lid", "remoteJidAlt": "5511987654321@s.whatsapp.net"}),
            json!({"conversation": "oi"}),
        );
        let WebhookEvent::Message(envelope) = parse_webhook(&body).expect("parse") else {
            panic!("expected message");
        };
        assert_eq!(envelope.address, "5511987654321");
        assert_eq!(envelope.network_id.as_deref(), Some("209876543210987@lid"));
    }

    #[test]
    fn own_group_broadcast_and_empty_messages_are_ignored() {
        assert_eq!(
            ignored(upsert(json!({"remoteJid": "5511@s.whatsapp.net", "fromMe": true}), json!({"conversation": "x"}))),
            IgnoredReason::FromMe
        );
        assert_eq!(
            ignored(upsert(json!({"remoteJid": "1203630@g.us"}), json!({"conversation": "x"}))),
            IgnoredReason::Group
        );
        assert_eq!(
            ignored(upsert(json!({"remoteJid": "status@broadcast"}), json!({"conversation": "x"}))),
            IgnoredReason::Broadcast
        );
        assert_eq!(
            ignored(upsert(json!({"remoteJid": "5511@s.whatsapp.net"}), json!({"conversation": "   "}))),
            IgnoredReason::Empty
        );
        assert_eq!(
            ignored(upsert(json!({}), json!({"conversation": "x"}))),
            IgnoredReason::MissingSender
        );
    }

    #[test]
    fn own_operator_commands_are_forwarded() {
        let body = upsert(
            json!({"remoteJid": "5511987654321@s.whatsapp.net", "fromMe": true, "id": "OWN1"}),
            json!({"conversation": "#desativar"}),
        );
        let WebhookEvent::Message(envelope) = parse_webhook(&body).expect("parse") else {
            panic!("expected operator command");
        };
        assert!(envelope.from_me);
        assert_eq!(envelope.address, "5511987654321");
        assert_eq!(envelope.text, "#desativar");
        assert!(envelope.push_name.is_none());

        let customer = upsert(
            json!({"remoteJid": "5511987654321@s.whatsapp.net", "fromMe": false}),
            json!({"conversation": "#desativar"}),
        );
        let WebhookEvent::Message(envelope) = parse_webhook(&customer).expect("parse") else {
            panic!("expected message");
        };
        assert!(!envelope.from_me);
    }

    #[test]
    fn other_events_are_ignored_and_missing_instance_is_malformed() {
        let reason = ignored(json!({"event": "connection.update", "instance": "loja-1", "data": {}}));
        assert_eq!(reason, IgnoredReason::UnsupportedEvent("connection.update".to_owned()));

        let error = parse_webhook(&json!({"event": "messages.upsert", "data": {}}))
            .expect_err("no instance");
        assert_eq!(error, WebhookError::Malformed("missing instance".to_owned()));
    }
}
