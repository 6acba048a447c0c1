//! Scripted dialogue ahead of intent classification and the AI flow.
//!
//! The resolver reads the persisted [`DialogueState`] instead of re-scanning the
//! transcript. [`reconstruct_dialogue`] rebuilds that state once for legacy
//! conversations that predate the state column.

use relaydesk_core::domain::contact::capitalized_first_name;
use relaydesk_core::{Awaiting, BillingAction, DialogueEvent, DialogueState, Message, SenderKind};
use relaydesk_core::text;

use crate::billing::{BillingRequest, ASK_DOCUMENT_INQUIRY, ASK_DOCUMENT_UNBLOCK};
use crate::catalog::{highest_listed_index, PRICE_MARKER};
use crate::detectors::{transfer_message, HumanRequestDetector};
use crate::document::{extract_document, is_bare_document};
use crate::rules::{any_phrase, Thresholds};

pub const HANDOFF_MENU_REPLY: &str = "Entendi! Vou transferir você agora para um atendente \
humano que pode te ajudar melhor. Aguarde só um instante, por favor.";
pub const UNBLOCK_CANCELLED: &str =
    "Entendi! O desbloqueio foi cancelado. Se precisar de mais alguma coisa, estou à disposição! 😊";

const NAME_INTENT_WORDS: &[&str] = &[
    "fatura",
    "boleto",
    "pagamento",
    "pagar",
    "pix",
    "debito",
    "desbloqueio",
    "desbloquear",
    "liberar",
    "bloqueado",
    "internet",
    "conta",
    "consultar",
    "verificar",
    "ver",
    "quero",
    "preciso",
    "atendente",
    "humano",
    "pessoa",
    "ajuda",
    "problema",
    "suporte",
    "cpf",
    "cnpj",
];

const INQUIRY_MENU_PHRASES: &[&str] =
    &["consultar faturas", "faturas em aberto", "consulta de faturas"];
const HANDOFF_MENU_PHRASES: &[&str] = &["falar com atendente", "atendente humano"];

const CONFIRM_WORDS: &[&str] = &["sim", "s", "yes"];
const CONFIRM_PHRASES: &[&str] = &["quero", "desejo", "fazer", "desbloquear"];
const DECLINE_WORDS: &[&str] = &["não", "nao", "n", "no"];
const DECLINE_PHRASES: &[&str] = &["cancelar", "não quero"];

const NAME_MARKERS: &[&str] =
    &["qual é o seu nome", "qual o seu nome", "me diga seu nome", "como você se chama"];
const DOCUMENT_MARKERS: &[&str] =
    &["preciso do cpf", "cpf ou cnpj", "informe o cpf", "informe o cnpj", "por favor, informe"];
const UNBLOCK_MARKERS: &[&str] = &[
    "deseja realizar o desbloqueio",
    "digite *sim* para desbloquear",
    "responda *sim* ou *não*",
];

/// Bot messages scanned for an open question when rebuilding legacy state.
const MARKER_SCAN_DEPTH: usize = 5;
/// Contact messages scanned for a previously supplied document.
const DOCUMENT_SCAN_DEPTH: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptedStep {
    Greeting,
    NameCaptured,
    DocumentRequested,
    UnblockCancelled,
    HandoffMenu,
    HumanRequest,
}

impl ScriptedStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::NameCaptured => "name_captured",
            Self::DocumentRequested => "document_requested",
            Self::UnblockCancelled => "unblock_cancelled",
            Self::HandoffMenu => "handoff_menu",
            Self::HumanRequest => "human_request",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptedReply {
    pub text: String,
    pub events: Vec<DialogueEvent>,
    pub step: ScriptedStep,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScriptedDecision {
    Reply(ScriptedReply),
    /// The contact answered the name question; the name is persisted before replying.
    CaptureName { name: String, reply: ScriptedReply },
    Billing(BillingRequest),
    /// Hand the conversation to a person: contact waits for an attendant.
    Handoff { reply: ScriptedReply, confidence: f32 },
    /// No scripted answer; carries state changes to apply on the eventual reply.
    Pass { events: Vec<DialogueEvent> },
}

/// Inputs the resolver needs for one turn.
#[derive(Clone, Copy, Debug)]
pub struct ScriptedTurn<'a> {
    pub message: &'a str,
    pub state: &'a DialogueState,
    pub workspace_name: &'a str,
    pub first_name: Option<&'a str>,
    pub negotiating: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ScriptedFlowResolver {
    human: HumanRequestDetector,
    thresholds: Thresholds,
}

impl ScriptedFlowResolver {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { human: HumanRequestDetector, thresholds }
    }

    pub fn resolve(&self, turn: ScriptedTurn<'_>) -> ScriptedDecision {
        let message = turn.message.trim();
        let folded = text::fold(message);
        let words = text::fold_words(message);
        let mut events = Vec::new();

        if turn.state.is_first_contact() {
            return ScriptedDecision::Reply(ScriptedReply {
                text: greeting(turn.workspace_name),
                events: vec![DialogueEvent::GreetingSent],
                step: ScriptedStep::Greeting,
            });
        }

        if turn.state.awaiting == Awaiting::Name {
            if let Some(name) = as_name(message) {
                let first = capitalized_first_name(&name).unwrap_or_else(|| name.clone());
                return ScriptedDecision::CaptureName {
                    reply: ScriptedReply {
                        text: name_menu(&first),
                        events: vec![DialogueEvent::NameCaptured],
                        step: ScriptedStep::NameCaptured,
                    },
                    name,
                };
            }
            events.push(DialogueEvent::ExpectationDropped);
        }

        if is_inquiry_menu(message, &words, &folded) {
            let document = extract_document(message);
            return match document {
                Some(document) => {
                    events.push(DialogueEvent::DocumentSupplied(document.digits().to_owned()));
                    ScriptedDecision::Billing(
                        BillingRequest::new(BillingAction::Inquiry, Some(document))
                            .with_events(events),
                    )
                }
                None => {
                    events.push(DialogueEvent::DocumentRequested(BillingAction::Inquiry));
                    ScriptedDecision::Reply(ScriptedReply {
                        text: ASK_DOCUMENT_INQUIRY.to_owned(),
                        events,
                        step: ScriptedStep::DocumentRequested,
                    })
                }
            };
        }

        if turn.state.awaiting == Awaiting::UnblockConfirmation {
            match confirmation(&words, &folded) {
                Some(false) => {
                    events.push(DialogueEvent::UnblockAnswered);
                    return ScriptedDecision::Reply(ScriptedReply {
                        text: UNBLOCK_CANCELLED.to_owned(),
                        events,
                        step: ScriptedStep::UnblockCancelled,
                    });
                }
                Some(true) => {
                    events.push(DialogueEvent::UnblockAnswered);
                    let known = extract_document(message).or_else(|| {
                        turn.state
                            .known_document
                            .as_deref()
                            .and_then(relaydesk_core::TaxDocument::from_digits)
                    });
                    return match known {
                        Some(document) => ScriptedDecision::Billing(
                            BillingRequest::new(BillingAction::Unblock, Some(document))
                                .with_events(events),
                        ),
                        None => {
                            events.push(DialogueEvent::DocumentRequested(BillingAction::Unblock));
                            ScriptedDecision::Reply(ScriptedReply {
                                text: ASK_DOCUMENT_UNBLOCK.to_owned(),
                                events,
                                step: ScriptedStep::DocumentRequested,
                            })
                        }
                    };
                }
                None => events.push(DialogueEvent::ExpectationDropped),
            }
        }

        if let Some(document) = extract_document(message) {
            events.push(DialogueEvent::DocumentSupplied(document.digits().to_owned()));
            let action = match turn.state.awaiting {
                Awaiting::Document(action) => Some(action),
                _ if is_bare_document(message) => Some(BillingAction::Inquiry),
                _ => None,
            };
            if let Some(action) = action {
                return ScriptedDecision::Billing(
                    BillingRequest::new(action, Some(document)).with_events(events),
                );
            }
        }

        // A negotiating contact already has a person assigned; handoffs stay closed.
        if turn.negotiating {
            return ScriptedDecision::Pass { events };
        }

        if is_handoff_menu(message, &words, &folded) {
            events.push(DialogueEvent::HandedOff);
            return ScriptedDecision::Handoff {
                reply: ScriptedReply {
                    text: HANDOFF_MENU_REPLY.to_owned(),
                    events,
                    step: ScriptedStep::HandoffMenu,
                },
                confidence: 1.0,
            };
        }

        let detection = self.human.detect(message);
        if detection.detected && detection.confidence > self.thresholds.human_request {
            events.push(DialogueEvent::HandedOff);
            return ScriptedDecision::Handoff {
                reply: ScriptedReply {
                    text: transfer_message(turn.first_name),
                    events,
                    step: ScriptedStep::HumanRequest,
                },
                confidence: detection.confidence,
            };
        }

        ScriptedDecision::Pass { events }
    }
}

pub fn greeting(workspace_name: &str) -> String {
    format!(
        "Olá! 👋 Sou da *{workspace_name}* e estou aqui para te ajudar no que precisar!\n\n\
         Para começar, qual é o seu nome? 😊"
    )
}

pub fn name_menu(first_name: &str) -> String {
    format!(
        "Muito prazer, *{first_name}*! 😊\n\nTenho acesso ao sistema e posso te ajudar com:\n\n\
         • Consultar faturas em aberto\n• Enviar boletos para pagamento\n\
         • Realizar desbloqueio de confiança\n• Tirar dúvidas sobre serviços\n\n\
         Como posso te ajudar hoje?"
    )
}

/// The message read as a personal name, if it looks like one.
fn as_name(message: &str) -> Option<String> {
    let length = message.chars().count();
    if !(3..50).contains(&length) || message.contains('?') {
        return None;
    }
    if message.chars().all(|ch| ch.is_ascii_digit() || ch.is_whitespace()) {
        return None;
    }
    let words = text::fold_words(message);
    if words.is_empty()
        || ["1", "2", "um", "dois"].contains(&words.as_str())
        || NAME_INTENT_WORDS.iter().any(|word| text::contains_word(&words, word))
        || words.contains("sem internet")
    {
        return None;
    }
    Some(message.to_owned())
}

fn is_inquiry_menu(message: &str, words: &str, folded: &str) -> bool {
    matches!(message, "1" | "1️⃣") || words == "um" || any_phrase(folded, INQUIRY_MENU_PHRASES)
}

fn is_handoff_menu(message: &str, words: &str, folded: &str) -> bool {
    matches!(message, "2" | "2️⃣") || words == "dois" || any_phrase(folded, HANDOFF_MENU_PHRASES)
}

/// `Some(true)` to unblock, `Some(false)` to cancel. Negatives are checked first
/// so "não quero" cancels even though it contains "quero".
fn confirmation(words: &str, folded: &str) -> Option<bool> {
    if DECLINE_WORDS.iter().any(|word| words == text::fold(word))
        || any_phrase(folded, DECLINE_PHRASES)
    {
        return Some(false);
    }
    if CONFIRM_WORDS.contains(&words) || any_phrase(folded, CONFIRM_PHRASES) {
        return Some(true);
    }
    None
}

/// Rebuilds the dialogue cursor from a chronological transcript for
/// conversations stored before the state column existed.
pub fn reconstruct_dialogue(history: &[Message]) -> DialogueState {
    let bot: Vec<&Message> =
        history.iter().filter(|message| message.sender == SenderKind::Bot).collect();

    let awaiting = bot
        .iter()
        .rev()
        .take(MARKER_SCAN_DEPTH)
        .find_map(|message| awaiting_from(&message.content))
        .unwrap_or_default();

    let last_list_index = bot
        .iter()
        .rev()
        .find(|message| message.content.contains(PRICE_MARKER))
        .and_then(|message| highest_listed_index(&message.content));

    let known_document = history
        .iter()
        .rev()
        .filter(|message| message.sender == SenderKind::Contact)
        .take(DOCUMENT_SCAN_DEPTH)
        .find_map(|message| extract_document(&message.content))
        .map(|document| document.digits().to_owned());

    DialogueState {
        awaiting,
        last_list_index,
        automated_reply_count: u32::try_from(bot.len()).unwrap_or(u32::MAX),
        known_document,
    }
}

fn awaiting_from(bot_text: &str) -> Option<Awaiting> {
    let folded = text::fold(bot_text);
    if any_phrase(&folded, UNBLOCK_MARKERS) {
        return Some(Awaiting::UnblockConfirmation);
    }
    if any_phrase(&folded, DOCUMENT_MARKERS) {
        let action = if folded.contains("desbloqueio") {
            BillingAction::Unblock
        } else {
            BillingAction::Inquiry
        };
        return Some(Awaiting::Document(action));
    }
    if any_phrase(&folded, NAME_MARKERS) {
        return Some(Awaiting::Name);
    }
    None
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use relaydesk_core::{
        Awaiting, BillingAction, ConversationId, DialogueEvent, DialogueState, Message, MessageId,
        MessageKind, SenderKind,
    };

    use super::{
        reconstruct_dialogue, ScriptedDecision, ScriptedFlowResolver, ScriptedStep, ScriptedTurn,
        HANDOFF_MENU_REPLY, UNBLOCK_CANCELLED,
    };
    use crate::billing::{ASK_DOCUMENT_INQUIRY, ASK_DOCUMENT_UNBLOCK};

    fn state(awaiting: Awaiting) -> DialogueState {
        DialogueState { awaiting, automated_reply_count: 1, ..DialogueState::default() }
    }

    fn resolve(message: &str, state: &DialogueState) -> ScriptedDecision {
        ScriptedFlowResolver::default().resolve(ScriptedTurn {
            message,
            state,
            workspace_name: "Farmácia Vida",
            first_name: Some("Ana"),
            negotiating: false,
        })
    }

    fn step(decision: &ScriptedDecision) -> Option<ScriptedStep> {
        match decision {
            ScriptedDecision::Reply(reply)
            | ScriptedDecision::CaptureName { reply, .. }
            | ScriptedDecision::Handoff { reply, .. } => Some(reply.step),
            ScriptedDecision::Billing(_) | ScriptedDecision::Pass { .. } => None,
        }
    }

    #[test]
    fn first_contact_always_gets_the_greeting() {
        let decision = resolve("quero falar com atendente", &DialogueState::default());
        match decision {
            ScriptedDecision::Reply(reply) => {
                assert_eq!(reply.step, ScriptedStep::Greeting);
                assert!(reply.text.contains("Sou da *Farmácia Vida*"));
                assert!(reply.text.contains("qual é o seu nome?"));
                assert_eq!(reply.events, vec![DialogueEvent::GreetingSent]);
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn name_answer_is_captured_and_capitalized() {
        match resolve("joão da silva", &state(Awaiting::Name)) {
            ScriptedDecision::CaptureName { name, reply } => {
                assert_eq!(name, "joão da silva");
                assert!(reply.text.starts_with("Muito prazer, *João*! 😊"));
                assert_eq!(reply.events, vec![DialogueEvent::NameCaptured]);
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn intent_instead_of_name_drops_the_expectation() {
        for message in ["quero ver meu boleto", "12345", "1", "tem dipirona?", "oi"] {
            let decision = resolve(message, &state(Awaiting::Name));
            assert!(
                !matches!(decision, ScriptedDecision::CaptureName { .. }),
                "{message} is not a name"
            );
        }

        match resolve("quero ver meu boleto", &state(Awaiting::Name)) {
            ScriptedDecision::Pass { events } => {
                assert_eq!(events, vec![DialogueEvent::ExpectationDropped]);
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn inquiry_menu_asks_for_document_or_runs_billing() {
        match resolve("1", &state(Awaiting::None)) {
            ScriptedDecision::Reply(reply) => {
                assert_eq!(reply.text, ASK_DOCUMENT_INQUIRY);
                assert_eq!(
                    reply.events,
                    vec![DialogueEvent::DocumentRequested(BillingAction::Inquiry)]
                );
            }
            other => panic!("unexpected decision: {other:?}"),
        }

        match resolve("consultar faturas 084.844.316-06", &state(Awaiting::None)) {
            ScriptedDecision::Billing(request) => {
                assert_eq!(request.action, BillingAction::Inquiry);
                assert_eq!(
                    request.document.as_ref().map(|doc| doc.digits()),
                    Some("08484431606")
                );
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn unblock_confirmation_checks_negatives_first() {
        let known = DialogueState {
            known_document: Some("08484431606".to_owned()),
            ..state(Awaiting::UnblockConfirmation)
        };

        match resolve("não quero", &known) {
            ScriptedDecision::Reply(reply) => {
                assert_eq!(reply.text, UNBLOCK_CANCELLED);
                assert_eq!(reply.events, vec![DialogueEvent::UnblockAnswered]);
            }
            other => panic!("unexpected decision: {other:?}"),
        }

        match resolve("Sim", &known) {
            ScriptedDecision::Billing(request) => {
                assert_eq!(request.action, BillingAction::Unblock);
                assert_eq!(request.document.map(|doc| doc.digits().to_owned()).as_deref(), Some("08484431606"));
                assert_eq!(request.events, vec![DialogueEvent::UnblockAnswered]);
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn confirmation_without_known_document_asks_for_it() {
        match resolve("sim", &state(Awaiting::UnblockConfirmation)) {
            ScriptedDecision::Reply(reply) => {
                assert_eq!(reply.text, ASK_DOCUMENT_UNBLOCK);
                assert_eq!(
                    reply.events,
                    vec![
                        DialogueEvent::UnblockAnswered,
                        DialogueEvent::DocumentRequested(BillingAction::Unblock)
                    ]
                );
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn requested_document_runs_the_pending_action() {
        match resolve("meu cpf é 084.844.316-06", &state(Awaiting::Document(BillingAction::Unblock))) {
            ScriptedDecision::Billing(request) => {
                assert_eq!(request.action, BillingAction::Unblock);
                assert_eq!(
                    request.events,
                    vec![DialogueEvent::DocumentSupplied("08484431606".to_owned())]
                );
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn unrequested_document_only_runs_when_bare() {
        assert!(matches!(
            resolve("08484431606", &state(Awaiting::None)),
            ScriptedDecision::Billing(_)
        ));

        match resolve("pedido 123, casa 45, tel 678901", &state(Awaiting::None)) {
            ScriptedDecision::Pass { events } => assert_eq!(
                events,
                vec![DialogueEvent::DocumentSupplied("12345678901".to_owned())]
            ),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn handoff_menu_and_human_requests() {
        match resolve("2", &state(Awaiting::None)) {
            ScriptedDecision::Handoff { reply, .. } => {
                assert_eq!(reply.text, HANDOFF_MENU_REPLY);
                assert_eq!(reply.events, vec![DialogueEvent::HandedOff]);
            }
            other => panic!("unexpected decision: {other:?}"),
        }

        let human = resolve("quero falar com uma pessoa", &state(Awaiting::None));
        assert_eq!(step(&human), Some(ScriptedStep::HumanRequest));
        if let ScriptedDecision::Handoff { reply, confidence } = human {
            assert!(reply.text.starts_with("Ana, entendo"));
            assert!(confidence > 0.5);
        }

        let negotiating = ScriptedFlowResolver::default().resolve(ScriptedTurn {
            message: "quero falar com uma pessoa",
            state: &state(Awaiting::None),
            workspace_name: "Farmácia Vida",
            first_name: None,
            negotiating: true,
        });
        assert!(matches!(negotiating, ScriptedDecision::Pass { .. }));
    }

    #[test]
    fn negotiating_contact_never_reaches_the_handoff_menu() {
        for message in ["2", "dois", "falar com atendente", "atendente humano"] {
            let decision = ScriptedFlowResolver::default().resolve(ScriptedTurn {
                message,
                state: &state(Awaiting::None),
                workspace_name: "Farmácia Vida",
                first_name: Some("Ana"),
                negotiating: true,
            });
            assert_eq!(decision, ScriptedDecision::Pass { events: vec![] }, "message: {message}");
        }
    }

    #[test]
    fn unrelated_messages_pass_through() {
        assert_eq!(
            resolve("tem amoxicilina?", &state(Awaiting::None)),
            ScriptedDecision::Pass { events: vec![] }
        );
    }

    fn message(id: i64, sender: SenderKind, content: &str) -> Message {
        Message {
            id: MessageId(id),
            conversation_id: ConversationId(1),
            sender,
            content: content.to_owned(),
            kind: MessageKind::Text,
            media_url: None,
            sent_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().expect("time")
                + Duration::minutes(id),
        }
    }

    #[test]
    fn legacy_transcript_is_reconstructed() {
        let history = vec![
            message(1, SenderKind::Contact, "oi"),
            message(2, SenderKind::Bot, "Olá! 👋 ... Para começar, qual é o seu nome? 😊"),
            message(3, SenderKind::Contact, "Ana"),
            message(4, SenderKind::Bot, "1. SKU A1 — Dipirona — preço R$ 9,90\n2. SKU A2 — Dorflex — preço R$ 12,00"),
            message(5, SenderKind::Contact, "meu cpf 084.844.316-06"),
            message(
                6,
                SenderKind::Bot,
                "Encontrei 1 fatura... Você deseja realizar o desbloqueio de confiança? Responda *sim* ou *não*.",
            ),
        ];

        let state = reconstruct_dialogue(&history);
        assert_eq!(state.awaiting, Awaiting::UnblockConfirmation);
        assert_eq!(state.last_list_index, Some(2));
        assert_eq!(state.automated_reply_count, 3);
        assert_eq!(state.known_document.as_deref(), Some("08484431606"));
    }

    #[test]
    fn reconstruction_reads_document_requests_by_action() {
        let history = vec![
            message(1, SenderKind::Bot, "Olá!"),
            message(
                2,
                SenderKind::Bot,
                "Para realizar o desbloqueio, preciso do CPF ou CNPJ do titular da conta.",
            ),
        ];
        assert_eq!(
            reconstruct_dialogue(&history).awaiting,
            Awaiting::Document(BillingAction::Unblock)
        );
        assert_eq!(reconstruct_dialogue(&[]), DialogueState::default());
    }
}
