//! One inbound message in, at most one reply out.
//!
//! Turns for the same `(workspace, contact)` are serialized through a per-key
//! async mutex, so two messages from one contact never observe each other's
//! half-written state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Duration as ChronoDuration, Utc};
use relaydesk_core::config::OrchestratorConfig;
use relaydesk_core::domain::contact::collaborator_mode_command;
use relaydesk_core::flows::FlowTransitionError;
use relaydesk_core::{
    ApplicationError, AuditCategory, AuditContext, AuditEvent, AuditOutcome, BillingCredentials,
    BotConfig, Contact, ContactId, Conversation, ConversationStatus, DialogueEvent,
    DialogueState, DomainError, FlowEngine, InstanceKey, KanbanStatus, Message, MessageId,
    MessageKind, NewMessage, OutboundDocument, SenderKind, TaxDocument, Transport, WorkspaceId,
};
use relaydesk_db::Repositories;
use tracing::{debug, info, warn};

use crate::ai_flow::{
    with_negotiating_banner, AiOutcome, AiResponder, AiTurn, ImageTurn, ERROR_FALLBACK_REPLY,
};
use crate::billing::{BillingContext, BillingFlow, BillingGateway, BillingRequest};
use crate::calls::bounded;
use crate::catalog::{extract_keywords, wants_more, CatalogMatcher, CatalogPage, Pagination};
use crate::escalation::{EscalationDecision, EscalationInput, EscalationPolicy, EscalationReason};
use crate::intent::IntentClassifier;
use crate::llm::LlmClient;
use crate::media::{MediaInput, MediaPreprocessor, AUDIO_FAILURE_DECISION_TEXT, AUDIO_FAILURE_TEXT};
use crate::rules::Thresholds;
use crate::scripted::{reconstruct_dialogue, ScriptedDecision, ScriptedFlowResolver, ScriptedTurn};

const ACTOR: &str = "orchestrator";
const DEFAULT_WORKSPACE_NAME: &str = "nossa equipe";
/// Messages read back to rebuild the dialogue state of a legacy conversation.
const RECONSTRUCT_WINDOW: u32 = 50;
/// Contact messages searched for the query a "show more" request continues.
const MORE_QUERY_WINDOW: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    pub workspace_id: WorkspaceId,
    pub contact_id: ContactId,
    pub instance: InstanceKey,
    pub text: String,
    /// Chat address replies are sent to.
    pub origin_address: String,
    pub media: Option<MediaInput>,
    pub correlation_id: String,
    /// `Contact` for customer messages, `Agent` for messages an operator typed
    /// from the business account.
    pub sender: SenderKind,
    pub push_name: Option<String>,
    /// Network-private sender id (`@lid`), when the gateway reported one.
    pub network_id: Option<String>,
}

impl IncomingMessage {
    /// A customer text message with no sender profile.
    pub fn from_contact(
        workspace_id: WorkspaceId,
        contact_id: ContactId,
        instance: InstanceKey,
        origin_address: impl Into<String>,
        text: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id,
            contact_id,
            instance,
            text: text.into(),
            origin_address: origin_address.into(),
            media: None,
            correlation_id: correlation_id.into(),
            sender: SenderKind::Contact,
            push_name: None,
            network_id: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Scripted,
    Billing,
    Ai,
    /// A flow failed and the safe default reply was sent instead.
    Fallback,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scripted => "scripted",
            Self::Billing => "billing",
            Self::Ai => "ai",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SilentReason {
    CollaboratorMode,
    WaitingForHuman,
    HumanInProgress,
    /// An operator wrote in the chat; it is stored, never answered.
    OperatorMessage,
}

impl SilentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollaboratorMode => "collaborator_mode",
            Self::WaitingForHuman => "waiting_for_human",
            Self::HumanInProgress => "human_in_progress",
            Self::OperatorMessage => "operator_message",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Replied { reply: String, route: Route, escalated: bool },
    Silent { reason: SilentReason },
    /// An operator toggled collaborator mode; nothing is sent back.
    OperatorCommand { collaborator_mode: bool },
}

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub llm: Arc<dyn LlmClient>,
    pub billing: Arc<dyn BillingGateway>,
    pub media: Arc<dyn MediaPreprocessor>,
}

#[derive(Default)]
struct TurnLocks {
    inner: Mutex<HashMap<(WorkspaceId, ContactId), Arc<tokio::sync::Mutex<()>>>>,
}

impl TurnLocks {
    /// The lock for one key. Entries nobody holds are pruned on the way in.
    fn handle(&self, key: (WorkspaceId, ContactId)) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Inbound text after media preprocessing.
struct PreparedTurn {
    /// Persisted as the inbound message content.
    stored: String,
    /// What the decision logic reads.
    decision: String,
    kind: MessageKind,
    media_url: Option<String>,
    image: Option<ImageTurn>,
}

impl PreparedTurn {
    fn text(raw: &str) -> Self {
        let text = raw.trim().to_owned();
        Self {
            stored: text.clone(),
            decision: text,
            kind: MessageKind::Text,
            media_url: None,
            image: None,
        }
    }
}

enum Effect {
    None,
    /// The contact asked for a person; the bot goes quiet.
    WaitForAttendant { confidence: f32 },
    /// The bot hands off but keeps answering while negotiating.
    Escalate(EscalationReason),
}

struct Plan {
    reply: String,
    route: Route,
    events: Vec<DialogueEvent>,
    attachments: Vec<OutboundDocument>,
    audit: Vec<AuditEvent>,
    effect: Effect,
}

impl Plan {
    fn reply(route: Route, reply: String, events: Vec<DialogueEvent>) -> Self {
        Self {
            reply,
            route,
            events,
            attachments: Vec::new(),
            audit: Vec::new(),
            effect: Effect::None,
        }
    }

    fn fallback(events: Vec<DialogueEvent>) -> Self {
        Self::reply(Route::Fallback, ERROR_FALLBACK_REPLY.to_owned(), events)
    }
}

/// Per-turn facts shared by the decision steps.
struct TurnContext<'a> {
    incoming: &'a IncomingMessage,
    contact: &'a Contact,
    conversation: &'a Conversation,
    workspace_name: &'a str,
    credentials: Option<BillingCredentials>,
    state: &'a DialogueState,
    prepared: &'a PreparedTurn,
    inbound_id: Option<MessageId>,
    negotiating: bool,
    audit: AuditContext,
}

pub struct ConversationOrchestrator {
    repos: Repositories,
    transport: Arc<dyn Transport>,
    media: Arc<dyn MediaPreprocessor>,
    config: OrchestratorConfig,
    thresholds: Thresholds,
    flow: FlowEngine<relaydesk_core::flows::DialogueFlow>,
    scripted: ScriptedFlowResolver,
    intents: IntentClassifier,
    catalog: CatalogMatcher,
    escalation: EscalationPolicy,
    billing: BillingFlow,
    ai: AiResponder,
    locks: TurnLocks,
}

impl ConversationOrchestrator {
    pub fn new(
        repos: Repositories,
        collaborators: Collaborators,
        config: OrchestratorConfig,
    ) -> Self {
        let thresholds = Thresholds::default();
        let call_timeout = config.call_timeout();
        Self {
            repos,
            transport: collaborators.transport,
            media: collaborators.media,
            thresholds,
            flow: FlowEngine::default(),
            scripted: ScriptedFlowResolver::new(thresholds),
            intents: IntentClassifier::default(),
            catalog: CatalogMatcher::new(config.page_size),
            escalation: EscalationPolicy::new(&config, thresholds),
            billing: BillingFlow::new(collaborators.billing, call_timeout),
            ai: AiResponder::new(collaborators.llm, config.history_turns, call_timeout),
            locks: TurnLocks::default(),
            config,
        }
    }

    /// Runs one turn. Errors only when the contact or its conversation cannot
    /// be loaded; every later failure degrades to a safe reply.
    pub async fn process_incoming_message(
        &self,
        incoming: IncomingMessage,
    ) -> Result<TurnOutcome, ApplicationError> {
        let lock = self.locks.handle((incoming.workspace_id, incoming.contact_id));
        let _turn = lock.lock().await;

        let mut contact = self
            .repos
            .contacts
            .find_by_id(incoming.contact_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .ok_or_else(|| {
                DomainError::InvariantViolation(format!(
                    "contact {} not found",
                    incoming.contact_id
                ))
            })?;

        if incoming.sender == SenderKind::Agent {
            return self.operator_turn(&incoming, &mut contact).await;
        }

        if contact.metadata.record_inbound(
            incoming.push_name.as_deref(),
            incoming.network_id.as_deref(),
        ) {
            if let Err(error) =
                self.repos.contacts.update_metadata(contact.id, &contact.metadata).await
            {
                warn!(
                    event_name = "orchestrator.contact.metadata_failed",
                    correlation_id = %incoming.correlation_id,
                    contact_id = %contact.id,
                    error = %error,
                    "contact metadata could not be updated"
                );
            }
        }

        let workspace = match self.repos.workspaces.find_by_id(incoming.workspace_id).await {
            Ok(workspace) => workspace,
            Err(error) => {
                warn!(
                    event_name = "orchestrator.workspace.load_failed",
                    correlation_id = %incoming.correlation_id,
                    workspace_id = %incoming.workspace_id,
                    error = %error,
                    "workspace could not be loaded"
                );
                None
            }
        };

        if contact.status == KanbanStatus::Archived {
            self.repos
                .contacts
                .update_status(contact.id, &KanbanStatus::NewContact)
                .await
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
            info!(
                event_name = "orchestrator.contact.unarchived",
                correlation_id = %incoming.correlation_id,
                contact_id = %contact.id,
                "archived contact wrote again"
            );
            contact.status = KanbanStatus::NewContact;
        }

        let mut conversation = self.open_conversation(&incoming, contact.id).await?;

        let prepared = self.prepare_media(&incoming).await;
        let inbound_id = self.persist_inbound(&incoming, &conversation, &prepared).await;

        if let Some(reason) = silent_reason(&contact, &conversation) {
            info!(
                event_name = "orchestrator.turn.silent",
                correlation_id = %incoming.correlation_id,
                conversation_id = %conversation.id,
                reason = reason.as_str(),
                "bot stays silent"
            );
            return Ok(TurnOutcome::Silent { reason });
        }

        let negotiating = contact.status == KanbanStatus::Negotiating;
        if conversation.status == ConversationStatus::PendingHuman && !negotiating {
            match self
                .repos
                .conversations
                .update_status(conversation.id, ConversationStatus::BotHandling)
                .await
            {
                Ok(()) => {
                    conversation.status = ConversationStatus::BotHandling;
                    info!(
                        event_name = "orchestrator.handoff.reclaimed",
                        correlation_id = %incoming.correlation_id,
                        conversation_id = %conversation.id,
                        "stale handoff returned to the bot"
                    );
                }
                Err(error) => warn!(
                    event_name = "orchestrator.handoff.reclaim_failed",
                    correlation_id = %incoming.correlation_id,
                    conversation_id = %conversation.id,
                    error = %error,
                    "stale handoff could not be reclaimed"
                ),
            }
        }

        let state = self.dialogue_state(&conversation, inbound_id).await;
        let workspace_name =
            workspace.as_ref().map(|workspace| workspace.name.as_str()).unwrap_or(DEFAULT_WORKSPACE_NAME);
        let context = TurnContext {
            incoming: &incoming,
            contact: &contact,
            conversation: &conversation,
            workspace_name,
            credentials: workspace
                .as_ref()
                .and_then(|workspace| BillingCredentials::from_workspace_metadata(&workspace.metadata)),
            state: &state,
            prepared: &prepared,
            inbound_id,
            negotiating,
            audit: AuditContext::new(
                incoming.workspace_id,
                Some(conversation.id),
                incoming.correlation_id.clone(),
                ACTOR,
            ),
        };

        let mut plan = self.decide(&context).await;
        let escalated = self.apply_effect(&context, &mut plan).await;
        if negotiating {
            plan.reply = with_negotiating_banner(&plan.reply);
        }

        self.record(&context, &plan).await;
        self.deliver(&context, &plan).await;

        info!(
            event_name = "orchestrator.turn.replied",
            correlation_id = %incoming.correlation_id,
            conversation_id = %conversation.id,
            route = plan.route.as_str(),
            escalated,
            "turn completed"
        );
        Ok(TurnOutcome::Replied { reply: plan.reply, route: plan.route, escalated })
    }

    async fn open_conversation(
        &self,
        incoming: &IncomingMessage,
        contact_id: ContactId,
    ) -> Result<Conversation, ApplicationError> {
        self.repos
            .conversations
            .find_open_or_create(incoming.workspace_id, contact_id)
            .await
            .map_err(|error| {
                DomainError::InvariantViolation(format!(
                    "conversation for contact {contact_id} could not be loaded or created: {error}"
                ))
                .into()
            })
    }

    /// Operator messages are stored for the transcript. `#deactivate` and
    /// `#activate` toggle collaborator mode; nothing is ever sent back.
    async fn operator_turn(
        &self,
        incoming: &IncomingMessage,
        contact: &mut Contact,
    ) -> Result<TurnOutcome, ApplicationError> {
        let conversation = self.open_conversation(incoming, contact.id).await?;
        let prepared = PreparedTurn::text(&incoming.text);
        self.persist_inbound(incoming, &conversation, &prepared).await;

        let Some(enabled) = collaborator_mode_command(&prepared.decision) else {
            debug!(
                event_name = "orchestrator.operator_message",
                correlation_id = %incoming.correlation_id,
                conversation_id = %conversation.id,
                "operator message stored"
            );
            return Ok(TurnOutcome::Silent { reason: SilentReason::OperatorMessage });
        };

        contact.metadata.collaborator_mode = enabled;
        if let Err(error) = self.repos.contacts.update_metadata(contact.id, &contact.metadata).await
        {
            warn!(
                event_name = "orchestrator.operator_command.persist_failed",
                correlation_id = %incoming.correlation_id,
                contact_id = %contact.id,
                error = %error,
                "collaborator mode could not be stored"
            );
        }
        info!(
            event_name = "orchestrator.operator_command",
            correlation_id = %incoming.correlation_id,
            contact_id = %contact.id,
            collaborator_mode = enabled,
            "collaborator mode toggled"
        );
        Ok(TurnOutcome::OperatorCommand { collaborator_mode: enabled })
    }

    async fn prepare_media(&self, incoming: &IncomingMessage) -> PreparedTurn {
        let Some(media) = incoming.media.as_ref() else {
            return PreparedTurn::text(&incoming.text);
        };
        let text = incoming.text.trim().to_owned();

        let timeout = self.config.call_timeout();
        match media.kind {
            MessageKind::Audio => {
                let transcript =
                    bounded("media.transcribe", timeout, self.media.transcribe(media)).await;
                let (stored, decision) = match transcript {
                    Ok(transcript) if !transcript.trim().is_empty() => {
                        let transcript = transcript.trim().to_owned();
                        (transcript.clone(), transcript)
                    }
                    Ok(_) => (AUDIO_FAILURE_TEXT.to_owned(), AUDIO_FAILURE_DECISION_TEXT.to_owned()),
                    Err(error) => {
                        warn!(
                            event_name = "orchestrator.media.transcription_failed",
                            correlation_id = %incoming.correlation_id,
                            error = %error,
                            "audio could not be transcribed"
                        );
                        (AUDIO_FAILURE_TEXT.to_owned(), AUDIO_FAILURE_DECISION_TEXT.to_owned())
                    }
                };
                PreparedTurn {
                    stored,
                    decision,
                    kind: MessageKind::Audio,
                    media_url: media.url.clone(),
                    image: None,
                }
            }
            MessageKind::Image => {
                let image = match media.data_url() {
                    Some(url) => {
                        let hints = match bounded(
                            "media.describe_image",
                            timeout,
                            self.media.describe_image(media),
                        )
                        .await
                        {
                            Ok(insight) => insight.keywords,
                            Err(error) => {
                                warn!(
                                    event_name = "orchestrator.media.vision_failed",
                                    correlation_id = %incoming.correlation_id,
                                    error = %error,
                                    "image could not be described"
                                );
                                Vec::new()
                            }
                        };
                        Some(ImageTurn { url, hints })
                    }
                    None => None,
                };
                PreparedTurn {
                    stored: text.clone(),
                    decision: text,
                    kind: MessageKind::Image,
                    media_url: media.url.clone(),
                    image,
                }
            }
            kind => PreparedTurn {
                stored: text.clone(),
                decision: text,
                kind,
                media_url: media.url.clone(),
                image: None,
            },
        }
    }

    async fn persist_inbound(
        &self,
        incoming: &IncomingMessage,
        conversation: &Conversation,
        prepared: &PreparedTurn,
    ) -> Option<MessageId> {
        let message = NewMessage {
            kind: prepared.kind,
            media_url: prepared.media_url.clone(),
            ..NewMessage::text(conversation.id, incoming.sender, prepared.stored.clone())
        };
        match self.repos.messages.append(message).await {
            Ok(stored) => Some(stored.id),
            Err(error) => {
                warn!(
                    event_name = "orchestrator.inbound.persist_failed",
                    correlation_id = %incoming.correlation_id,
                    conversation_id = %conversation.id,
                    error = %error,
                    "inbound message could not be stored"
                );
                None
            }
        }
    }

    /// The persisted cursor, or one rebuilt from the transcript for
    /// conversations stored before the cursor existed.
    async fn dialogue_state(
        &self,
        conversation: &Conversation,
        inbound_id: Option<MessageId>,
    ) -> DialogueState {
        if let Some(state) = conversation.dialogue.clone() {
            return state;
        }
        match self.repos.messages.recent(conversation.id, RECONSTRUCT_WINDOW).await {
            Ok(history) => {
                let history = without(history, inbound_id);
                let state = reconstruct_dialogue(&history);
                debug!(
                    event_name = "orchestrator.dialogue.reconstructed",
                    conversation_id = %conversation.id,
                    automated_replies = state.automated_reply_count,
                    "dialogue state rebuilt from transcript"
                );
                state
            }
            Err(error) => {
                warn!(
                    event_name = "orchestrator.dialogue.reconstruct_failed",
                    conversation_id = %conversation.id,
                    error = %error,
                    "transcript unavailable; starting from an empty dialogue"
                );
                DialogueState::default()
            }
        }
    }

    async fn decide(&self, context: &TurnContext<'_>) -> Plan {
        let first_name = context.contact.first_name();
        let decision = self.scripted.resolve(ScriptedTurn {
            message: &context.prepared.decision,
            state: context.state,
            workspace_name: context.workspace_name,
            first_name: first_name.as_deref(),
            negotiating: context.negotiating,
        });

        let pending = match decision {
            ScriptedDecision::Reply(reply) => {
                debug!(
                    event_name = "orchestrator.scripted.reply",
                    conversation_id = %context.conversation.id,
                    step = reply.step.as_str(),
                    "scripted reply selected"
                );
                return Plan::reply(Route::Scripted, reply.text, reply.events);
            }
            ScriptedDecision::CaptureName { name, reply } => {
                if let Err(error) = self.repos.contacts.update_name(context.contact.id, &name).await
                {
                    warn!(
                        event_name = "orchestrator.contact.name_failed",
                        correlation_id = %context.incoming.correlation_id,
                        contact_id = %context.contact.id,
                        error = %error,
                        "captured name could not be stored"
                    );
                }
                return Plan::reply(Route::Scripted, reply.text, reply.events);
            }
            ScriptedDecision::Handoff { reply, confidence } => {
                let mut plan = Plan::reply(Route::Scripted, reply.text, reply.events);
                plan.effect = Effect::WaitForAttendant { confidence };
                return plan;
            }
            ScriptedDecision::Billing(request) => return self.run_billing(context, request).await,
            ScriptedDecision::Pass { events } => events,
        };

        let intent = self.intents.classify(&context.prepared.decision);
        if let Some(action) =
            intent.intent.billing_action().filter(|_| intent.is_actionable(self.thresholds.intent))
        {
            let document = intent.document.clone().or_else(|| {
                context.state.known_document.as_deref().and_then(TaxDocument::from_digits)
            });
            debug!(
                event_name = "orchestrator.intent.billing",
                conversation_id = %context.conversation.id,
                confidence = intent.confidence,
                "billing intent recognized"
            );
            let request = BillingRequest::new(action, document).with_events(pending);
            return self.run_billing(context, request).await;
        }

        self.run_ai(context, pending).await
    }

    async fn run_billing(&self, context: &TurnContext<'_>, request: BillingRequest) -> Plan {
        let billing_context = BillingContext {
            credentials: context.credentials.clone(),
            phone: &context.incoming.origin_address,
            audit: &context.audit,
            today: Utc::now().date_naive(),
        };
        let reply = self.billing.run(billing_context, request).await;
        Plan {
            reply: reply.text,
            route: Route::Billing,
            events: reply.events,
            attachments: reply.attachments,
            audit: reply.audit,
            effect: Effect::None,
        }
    }

    async fn run_ai(&self, context: &TurnContext<'_>, mut events: Vec<DialogueEvent>) -> Plan {
        let conversation_id = context.conversation.id;
        let bot_config = match self.repos.bot_configs.find(context.incoming.workspace_id).await {
            Ok(config) => config,
            Err(error) => {
                warn!(
                    event_name = "orchestrator.bot_config.load_failed",
                    correlation_id = %context.incoming.correlation_id,
                    error = %error,
                    "bot configuration unavailable"
                );
                return Plan::fallback(events);
            }
        };

        let window = (self.config.history_turns + 1).max(MORE_QUERY_WINDOW);
        let history = match self.repos.messages.recent(conversation_id, window as u32).await {
            Ok(history) => without(history, context.inbound_id),
            Err(error) => {
                warn!(
                    event_name = "orchestrator.history.load_failed",
                    conversation_id = %conversation_id,
                    error = %error,
                    "history unavailable; answering without it"
                );
                Vec::new()
            }
        };

        let active = bot_config.as_ref().is_some_and(|config| config.is_active);
        let mut catalog_exhausted = false;
        let page = if active {
            match self.catalog_page(context, &history).await {
                CatalogLookup::Page(page) => {
                    events.push(match page.last_index() {
                        Some(last_index) => DialogueEvent::CatalogListed { last_index },
                        None => DialogueEvent::CatalogReset,
                    });
                    Some(page)
                }
                CatalogLookup::Exhausted => {
                    catalog_exhausted = true;
                    None
                }
                CatalogLookup::Skipped => None,
            }
        } else {
            None
        };

        let first_name = context.contact.first_name();
        let history_start = history.len().saturating_sub(self.config.history_turns);
        let turn = AiTurn {
            bot_config: bot_config.as_ref(),
            first_name: first_name.as_deref(),
            history: &history[history_start..],
            user_message: &context.prepared.decision,
            image: context.prepared.image.as_ref(),
            catalog: page.as_ref(),
            negotiating: context.negotiating,
        };

        let reply = match self.ai.respond(&turn).await {
            Ok(AiOutcome::Inactive(reply)) => return Plan::reply(Route::Ai, reply, events),
            Ok(AiOutcome::Generated(reply)) => reply,
            Err(error) => {
                warn!(
                    event_name = "orchestrator.ai.failed",
                    correlation_id = %context.incoming.correlation_id,
                    conversation_id = %conversation_id,
                    call = error.call(),
                    timed_out = error.is_timeout(),
                    error = %error,
                    "AI reply unavailable; sending fallback"
                );
                return Plan::fallback(events);
            }
        };

        self.escalate_if_needed(context, bot_config.as_ref(), reply, events, catalog_exhausted)
            .await
    }

    async fn catalog_page(&self, context: &TurnContext<'_>, history: &[Message]) -> CatalogLookup {
        let message = context.prepared.decision.as_str();
        let hints =
            context.prepared.image.as_ref().map(|image| image.hints.clone()).unwrap_or_default();

        let resume_after = context.state.last_list_index.filter(|_| wants_more(message));
        let keywords = match resume_after {
            Some(_) => previous_query(history)
                .map(|query| extract_keywords(query, &[]))
                .unwrap_or_default(),
            None => extract_keywords(message, &hints),
        };
        if keywords.is_empty() {
            return CatalogLookup::Skipped;
        }

        let search = self.catalog.candidates(
            self.repos.products.as_ref(),
            context.incoming.workspace_id,
            &keywords,
        );
        let candidates = match bounded("catalog.search", self.config.call_timeout(), search).await
        {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(
                    event_name = "orchestrator.catalog.search_failed",
                    correlation_id = %context.incoming.correlation_id,
                    error = %error,
                    "catalog search failed; answering without products"
                );
                return CatalogLookup::Skipped;
            }
        };

        let ranked = self.catalog.rank(&keywords, candidates);
        match self.catalog.paginate(&ranked, resume_after) {
            Pagination::Page(page) => {
                debug!(
                    event_name = "orchestrator.catalog.page",
                    conversation_id = %context.conversation.id,
                    listed = page.items.len(),
                    total = page.total,
                    has_more = page.has_more,
                    "catalog page prepared"
                );
                CatalogLookup::Page(page)
            }
            Pagination::Exhausted { resume_at, total } => {
                info!(
                    event_name = "orchestrator.catalog.exhausted",
                    conversation_id = %context.conversation.id,
                    resume_at,
                    total,
                    "no more catalog items to list"
                );
                CatalogLookup::Exhausted
            }
        }
    }

    async fn escalate_if_needed(
        &self,
        context: &TurnContext<'_>,
        bot_config: Option<&BotConfig>,
        reply: String,
        mut events: Vec<DialogueEvent>,
        catalog_exhausted: bool,
    ) -> Plan {
        let since = Utc::now() - ChronoDuration::minutes(self.config.recent_window_minutes);
        let recent = match self
            .repos
            .messages
            .count_since(context.conversation.id, SenderKind::Bot, since)
            .await
        {
            Ok(count) => count,
            Err(error) => {
                warn!(
                    event_name = "orchestrator.escalation.count_failed",
                    conversation_id = %context.conversation.id,
                    error = %error,
                    "recent reply count unavailable"
                );
                0
            }
        };

        let input = EscalationInput {
            reply: &reply,
            user_message: &context.prepared.decision,
            automated_replies: context.state.automated_reply_count,
            recent_automated_replies: recent,
            already_negotiating: context.negotiating,
            transfer_rules: bot_config.map(|config| config.transfer_rules.as_slice()).unwrap_or(&[]),
            catalog_exhausted,
        };

        match self.escalation.evaluate(&input) {
            EscalationDecision::Escalate { reason, reply } => {
                events.push(DialogueEvent::HandedOff);
                let mut plan = Plan::reply(Route::Ai, reply, events);
                plan.effect = Effect::Escalate(reason);
                plan
            }
            EscalationDecision::AlreadyNegotiating | EscalationDecision::Stay => {
                Plan::reply(Route::Ai, reply, events)
            }
        }
    }

    /// Status changes and audit for a handoff. Returns whether the turn escalated.
    async fn apply_effect(&self, context: &TurnContext<'_>, plan: &mut Plan) -> bool {
        let (status, event) = match plan.effect {
            Effect::None => return false,
            Effect::WaitForAttendant { confidence } => (
                KanbanStatus::WaitingAttendant,
                context
                    .audit
                    .event("escalation.human_request", AuditCategory::Escalation, AuditOutcome::Success)
                    .with_metadata("confidence", format!("{confidence:.2}")),
            ),
            Effect::Escalate(reason) => (
                KanbanStatus::Negotiating,
                context
                    .audit
                    .event("escalation.triggered", AuditCategory::Escalation, AuditOutcome::Success)
                    .with_metadata("reason", reason.as_str()),
            ),
        };

        let contact_id = context.contact.id;
        let conversation_id = context.conversation.id;
        let mut event = event
            .with_metadata("contact_id", contact_id.to_string())
            .with_metadata("kanban_status", status.as_str());

        if let Err(error) = self.repos.contacts.update_status(contact_id, &status).await {
            warn!(
                event_name = "orchestrator.escalation.contact_failed",
                correlation_id = %context.incoming.correlation_id,
                contact_id = %contact_id,
                error = %error,
                "contact status could not be updated"
            );
            event.outcome = AuditOutcome::Failed;
        }
        if let Err(error) = self
            .repos
            .conversations
            .update_status(conversation_id, ConversationStatus::PendingHuman)
            .await
        {
            warn!(
                event_name = "orchestrator.escalation.conversation_failed",
                correlation_id = %context.incoming.correlation_id,
                conversation_id = %conversation_id,
                error = %error,
                "conversation status could not be updated"
            );
            event.outcome = AuditOutcome::Failed;
        }

        info!(
            event_name = "orchestrator.escalation",
            correlation_id = %context.incoming.correlation_id,
            conversation_id = %conversation_id,
            contact_id = %contact_id,
            kanban_status = %status.as_str(),
            "conversation handed to a human"
        );
        plan.audit.push(event);
        true
    }

    async fn record(&self, context: &TurnContext<'_>, plan: &Plan) {
        let conversation_id = context.conversation.id;
        let mut state = context.state.clone();
        for event in &plan.events {
            match self.flow.apply(&state, event) {
                Ok(outcome) => state = outcome.state,
                Err(error) => log_rejected_event(conversation_id, &error),
            }
        }
        let state = self.flow.record_reply(&state);

        let reply = NewMessage::text(conversation_id, SenderKind::Bot, plan.reply.clone());
        if let Err(error) = self.repos.conversations.record_bot_reply(reply, &state).await {
            warn!(
                event_name = "orchestrator.reply.persist_failed",
                correlation_id = %context.incoming.correlation_id,
                conversation_id = %conversation_id,
                error = %error,
                "bot reply could not be stored"
            );
        }

        for event in &plan.audit {
            if let Err(error) = self.repos.audit_events.append(event).await {
                warn!(
                    event_name = "orchestrator.audit.persist_failed",
                    correlation_id = %context.incoming.correlation_id,
                    event_type = %event.event_type,
                    error = %error,
                    "audit event could not be stored"
                );
            }
        }
    }

    async fn deliver(&self, context: &TurnContext<'_>, plan: &Plan) {
        let instance = &context.incoming.instance;
        let address = context.incoming.origin_address.as_str();
        let timeout = self.config.call_timeout();

        let sent = bounded(
            "transport.send_text",
            timeout,
            self.transport.send_text(instance, address, &plan.reply),
        )
        .await;
        if let Err(error) = sent {
            warn!(
                event_name = "orchestrator.reply.send_failed",
                correlation_id = %context.incoming.correlation_id,
                conversation_id = %context.conversation.id,
                contact_id = %context.contact.id,
                address,
                error = %error,
                "reply could not be delivered"
            );
        }

        for document in &plan.attachments {
            let sent = bounded(
                "transport.send_document",
                timeout,
                self.transport.send_document(instance, address, document.clone()),
            )
            .await;
            if let Err(error) = sent {
                warn!(
                    event_name = "orchestrator.document.send_failed",
                    correlation_id = %context.incoming.correlation_id,
                    conversation_id = %context.conversation.id,
                    contact_id = %context.contact.id,
                    address,
                    file_name = %document.file_name,
                    error = %error,
                    "document could not be delivered"
                );
            }
        }
    }
}

enum CatalogLookup {
    Page(CatalogPage),
    Exhausted,
    Skipped,
}

fn silent_reason(contact: &Contact, conversation: &Conversation) -> Option<SilentReason> {
    if contact.metadata.collaborator_mode {
        Some(SilentReason::CollaboratorMode)
    } else if contact.status.is_silent() {
        Some(SilentReason::WaitingForHuman)
    } else if conversation.status == ConversationStatus::InProgress {
        Some(SilentReason::HumanInProgress)
    } else {
        None
    }
}

fn without(history: Vec<Message>, excluded: Option<MessageId>) -> Vec<Message> {
    history.into_iter().filter(|message| Some(message.id) != excluded).collect()
}

/// The latest contact message that was a search rather than a "show more".
fn previous_query(history: &[Message]) -> Option<&str> {
    history
        .iter()
        .rev()
        .filter(|message| message.sender == SenderKind::Contact)
        .map(|message| message.content.as_str())
        .find(|content| !wants_more(content) && !extract_keywords(content, &[]).is_empty())
}

fn log_rejected_event(conversation_id: relaydesk_core::ConversationId, error: &FlowTransitionError) {
    warn!(
        event_name = "orchestrator.dialogue.event_rejected",
        conversation_id = %conversation_id,
        error = %error,
        "dialogue event skipped"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use relaydesk_core::config::OrchestratorConfig;
    use relaydesk_core::domain::product::NewProduct;
    use relaydesk_core::{
        AuditCategory, AuditOutcome, Awaiting, BillingAction, BotConfig, ContactId, ContactMetadata,
        ConversationStatus, DialogueState, InstanceKey, KanbanStatus, SenderKind, TransferRule,
        TransferSignal, Workspace, WorkspaceId,
    };
    use relaydesk_db::repositories::{
        AuditEventRepository, BotConfigRepository, ContactRepository, ConversationRepository,
        ProductRepository, WorkspaceRepository,
    };
    use relaydesk_db::{InMemoryStore, Repositories};
    use serde_json::json;

    use super::{
        Collaborators, ConversationOrchestrator, IncomingMessage, Route, SilentReason,
        TurnOutcome,
    };
    use crate::ai_flow::{ERROR_FALLBACK_REPLY, INACTIVE_REPLY, NEGOTIATING_BANNER};
    use crate::billing::{ASK_DOCUMENT_INQUIRY, NOT_CONFIGURED_INQUIRY};
    use crate::escalation::HANDOFF_REPLY;
    use crate::scripted::HANDOFF_MENU_REPLY;
    use crate::media::{MediaInput, AUDIO_FAILURE_TEXT};
    use crate::testing::{FakeBilling, FakeMedia, RecordingTransport, ScriptedLlm};

    const WORKSPACE: WorkspaceId = WorkspaceId(1);
    const ADDRESS: &str = "5511988887777";

    struct Harness {
        store: Arc<InMemoryStore>,
        transport: Arc<RecordingTransport>,
        llm: Arc<ScriptedLlm>,
        billing: Arc<FakeBilling>,
        orchestrator: ConversationOrchestrator,
        contact_id: ContactId,
    }

    struct HarnessBuilder {
        llm: ScriptedLlm,
        transport: RecordingTransport,
        billing: FakeBilling,
        media: FakeMedia,
        config: OrchestratorConfig,
        billing_configured: bool,
        bot_active: bool,
        transfer_rules: Vec<TransferRule>,
    }

    impl HarnessBuilder {
        fn new(llm: ScriptedLlm) -> Self {
            Self {
                llm,
                transport: RecordingTransport::default(),
                billing: FakeBilling::default(),
                media: FakeMedia::default(),
                config: OrchestratorConfig::default(),
                billing_configured: true,
                bot_active: true,
                transfer_rules: Vec::new(),
            }
        }

        fn billing(mut self, billing: FakeBilling) -> Self {
            self.billing = billing;
            self
        }

        fn transport(mut self, transport: RecordingTransport) -> Self {
            self.transport = transport;
            self
        }

        fn media(mut self, media: FakeMedia) -> Self {
            self.media = media;
            self
        }

        fn config(mut self, config: OrchestratorConfig) -> Self {
            self.config = config;
            self
        }

        fn without_billing(mut self) -> Self {
            self.billing_configured = false;
            self
        }

        fn inactive_bot(mut self) -> Self {
            self.bot_active = false;
            self
        }

        fn transfer_rules(mut self, rules: Vec<TransferRule>) -> Self {
            self.transfer_rules = rules;
            self
        }

        async fn build(self) -> Harness {
            let store = Arc::new(InMemoryStore::new());
            let metadata = if self.billing_configured {
                json!({"ixcApiUrl": "https://erp.example.test/webservice/v1", "ixcApiToken": "1:abc"})
            } else {
                json!({})
            };
            WorkspaceRepository::save(
                store.as_ref(),
                Workspace { id: WORKSPACE, name: "Farmácia Vida".to_owned(), metadata },
            )
            .await
            .expect("workspace");
            BotConfigRepository::save(
                store.as_ref(),
                BotConfig {
                    workspace_id: WORKSPACE,
                    master_prompt: Some("Você atende a Farmácia Vida.".to_owned()),
                    is_active: self.bot_active,
                    transfer_rules: self.transfer_rules,
                },
            )
            .await
            .expect("bot config");
            for (sku, name, price_cents) in [
                ("AMX-500", "Amoxicilina 500mg", 2_500),
                ("DIP-1G", "Dipirona 1g", 890),
                ("PAR-750", "Paracetamol 750mg", 1_250),
            ] {
                ProductRepository::save(
                    store.as_ref(),
                    NewProduct {
                        workspace_id: WORKSPACE,
                        sku: sku.to_owned(),
                        name: name.to_owned(),
                        price_cents,
                        quantity: 12,
                        description: None,
                    },
                )
                .await
                .expect("product");
            }
            let contact =
                store.find_or_create(WORKSPACE, ADDRESS).await.expect("contact");

            let transport = Arc::new(self.transport);
            let llm = Arc::new(self.llm);
            let billing = Arc::new(self.billing);
            let orchestrator = ConversationOrchestrator::new(
                Repositories::in_memory(store.clone()),
                Collaborators {
                    transport: transport.clone(),
                    llm: llm.clone(),
                    billing: billing.clone(),
                    media: Arc::new(self.media),
                },
                self.config,
            );
            Harness { store, transport, llm, billing, orchestrator, contact_id: contact.id }
        }
    }

    impl Harness {
        fn message(&self, text: &str) -> IncomingMessage {
            IncomingMessage::from_contact(
                WORKSPACE,
                self.contact_id,
                InstanceKey("farmacia-vida".to_owned()),
                ADDRESS,
                text,
                format!("test-{text}"),
            )
        }

        async fn send(&self, text: &str) -> TurnOutcome {
            self.orchestrator.process_incoming_message(self.message(text)).await.expect("turn")
        }

        /// A message typed by an operator from the business account.
        async fn operator(&self, text: &str) -> TurnOutcome {
            let message = IncomingMessage { sender: SenderKind::Agent, ..self.message(text) };
            self.orchestrator.process_incoming_message(message).await.expect("operator turn")
        }

        async fn conversation(&self) -> relaydesk_core::Conversation {
            self.store.find_open_or_create(WORKSPACE, self.contact_id).await.expect("conversation")
        }

        /// Skips the greeting and name capture.
        async fn past_greeting(&self, state: DialogueState) {
            let conversation = self.conversation().await;
            self.store
                .overwrite_dialogue(conversation.id, Some(state))
                .await
                .expect("dialogue");
        }

        async fn set_status(&self, status: KanbanStatus) {
            ContactRepository::update_status(self.store.as_ref(), self.contact_id, &status)
                .await
                .expect("status");
        }

        async fn contact(&self) -> relaydesk_core::Contact {
            ContactRepository::find_by_id(self.store.as_ref(), self.contact_id)
                .await
                .expect("lookup")
                .expect("contact")
        }
    }

    fn returning(count: u32) -> DialogueState {
        DialogueState { automated_reply_count: count, ..DialogueState::default() }
    }

    fn reply_of(outcome: &TurnOutcome) -> &str {
        match outcome {
            TurnOutcome::Replied { reply, .. } => reply,
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_message_gets_greeting_before_anything_else() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("não usado")).build().await;

        let outcome = harness.send("quero ver minhas faturas, falar com atendente").await;

        assert!(matches!(outcome, TurnOutcome::Replied { route: Route::Scripted, .. }));
        assert!(reply_of(&outcome).contains("*Farmácia Vida*"));
        assert!(harness.llm.requests().await.is_empty());
        let conversation = harness.conversation().await;
        let state = conversation.dialogue.expect("dialogue");
        assert_eq!(state.awaiting, Awaiting::Name);
        assert_eq!(state.automated_reply_count, 1);
        assert_eq!(harness.transport.texts().await.len(), 1);
    }

    #[tokio::test]
    async fn name_answer_is_captured_and_menu_sent() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("não usado")).build().await;
        harness.send("oi").await;

        let outcome = harness.send("maria souza").await;

        assert!(reply_of(&outcome).contains("Muito prazer, *Maria*"));
        assert_eq!(harness.contact().await.name.as_deref(), Some("maria souza"));
        let state = harness.conversation().await.dialogue.expect("dialogue");
        assert_eq!(state.awaiting, Awaiting::None);
        assert_eq!(state.automated_reply_count, 2);
    }

    #[tokio::test]
    async fn catalog_question_reaches_llm_with_ranked_products() {
        let harness =
            HarnessBuilder::new(ScriptedLlm::replying("Temos sim! 1. Amoxicilina 500mg - R$ 25,00"))
                .build()
                .await;
        harness.past_greeting(returning(1)).await;

        let outcome = harness.send("tem amoxicilina?").await;

        assert!(matches!(outcome, TurnOutcome::Replied { route: Route::Ai, escalated: false, .. }));
        assert!(reply_of(&outcome).contains("R$ 25,00"));
        let requests = harness.llm.requests().await;
        assert_eq!(requests.len(), 1);
        let context = requests[0][1].content.as_text();
        assert_eq!(context.matches("Amoxicilina 500mg").count(), 1, "catalog context: {context}");
        assert!(context.contains("R$ 25,00"));
        assert!(!context.contains("Dipirona"));

        let state = harness.conversation().await.dialogue.expect("dialogue");
        assert_eq!(state.last_list_index, Some(1));
        assert_eq!(harness.transport.texts().await[0].to, ADDRESS);
    }

    #[tokio::test]
    async fn silent_states_store_the_message_without_replying() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("olá")).build().await;
        harness.past_greeting(returning(2)).await;

        harness.set_status(KanbanStatus::WaitingAttendant).await;
        let waiting = harness.send("alguém aí?").await;
        assert_eq!(waiting, TurnOutcome::Silent { reason: SilentReason::WaitingForHuman });

        harness.set_status(KanbanStatus::Seller("3".to_owned())).await;
        let seller = harness.send("oi?").await;
        assert_eq!(seller, TurnOutcome::Silent { reason: SilentReason::WaitingForHuman });

        harness.set_status(KanbanStatus::NewContact).await;
        let conversation = harness.conversation().await;
        ConversationRepository::update_status(
            harness.store.as_ref(),
            conversation.id,
            ConversationStatus::InProgress,
        )
        .await
        .expect("status");
        let in_progress = harness.send("ainda aguardando").await;
        assert_eq!(in_progress, TurnOutcome::Silent { reason: SilentReason::HumanInProgress });

        assert!(harness.transport.texts().await.is_empty());
        let transcript = harness.store.transcript(conversation.id).await;
        assert_eq!(transcript.len(), 3);
        assert!(transcript.iter().all(|message| message.sender == SenderKind::Contact));
    }

    #[tokio::test]
    async fn operator_commands_toggle_collaborator_mode() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("olá")).build().await;
        harness.past_greeting(returning(2)).await;

        let off = harness.operator("#desativar").await;
        assert_eq!(off, TurnOutcome::OperatorCommand { collaborator_mode: true });
        assert!(harness.contact().await.metadata.collaborator_mode);

        let silent = harness.send("tem dipirona?").await;
        assert_eq!(silent, TurnOutcome::Silent { reason: SilentReason::CollaboratorMode });

        let on = harness.operator("#activate").await;
        assert_eq!(on, TurnOutcome::OperatorCommand { collaborator_mode: false });
        let replied = harness.send("tem dipirona?").await;
        assert!(matches!(replied, TurnOutcome::Replied { .. }));
        assert_eq!(harness.transport.texts().await.len(), 1);

        let conversation = harness.conversation().await;
        let senders: Vec<_> = harness
            .store
            .transcript(conversation.id)
            .await
            .into_iter()
            .map(|message| message.sender)
            .collect();
        assert_eq!(
            senders,
            [
                SenderKind::Agent,
                SenderKind::Contact,
                SenderKind::Agent,
                SenderKind::Contact,
                SenderKind::Bot
            ]
        );
    }

    #[tokio::test]
    async fn customer_typed_commands_are_plain_messages() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("Como posso ajudar?")).build().await;
        harness.past_greeting(returning(2)).await;

        let outcome = harness.send("#desativar").await;

        assert!(matches!(outcome, TurnOutcome::Replied { .. }));
        assert!(!harness.contact().await.metadata.collaborator_mode);
        assert_eq!(harness.transport.texts().await.len(), 1);
    }

    #[tokio::test]
    async fn operator_chatter_is_stored_without_reply() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("não usado")).build().await;
        harness.past_greeting(returning(2)).await;

        let outcome = harness.operator("Oi Maria, já verifico seu pedido.").await;

        assert_eq!(outcome, TurnOutcome::Silent { reason: SilentReason::OperatorMessage });
        assert!(harness.transport.texts().await.is_empty());
        assert!(harness.llm.requests().await.is_empty());
        assert!(!harness.contact().await.metadata.unread);
    }

    #[tokio::test]
    async fn inbound_profile_is_merged_without_losing_collaborator_mode() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("olá")).build().await;
        harness.past_greeting(returning(2)).await;
        harness.operator("#desativar").await;

        let message = IncomingMessage {
            push_name: Some("Maria Souza".to_owned()),
            network_id: Some("209876543210987@lid".to_owned()),
            ..harness.message("alguém aí?")
        };
        let outcome = harness.orchestrator.process_incoming_message(message).await.expect("turn");

        assert_eq!(outcome, TurnOutcome::Silent { reason: SilentReason::CollaboratorMode });
        let metadata = harness.contact().await.metadata;
        assert!(metadata.collaborator_mode);
        assert!(metadata.unread);
        assert_eq!(metadata.push_name.as_deref(), Some("Maria Souza"));
        assert_eq!(metadata.network_id.as_deref(), Some("209876543210987@lid"));
    }

    #[tokio::test]
    async fn negotiating_contact_gets_banner_once_and_never_reescalates() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying(
            "Vou transferir você para um atendente agora mesmo.",
        ))
        .build()
        .await;
        harness.past_greeting(returning(6)).await;
        harness.set_status(KanbanStatus::Negotiating).await;

        let outcome = harness.send("tem dipirona?").await;

        assert!(matches!(outcome, TurnOutcome::Replied { escalated: false, .. }));
        let reply = reply_of(&outcome);
        assert!(reply.starts_with(NEGOTIATING_BANNER));
        assert_eq!(reply.matches(NEGOTIATING_BANNER).count(), 1);
        assert_eq!(harness.contact().await.status, KanbanStatus::Negotiating);
        let conversation = harness.conversation().await;
        let audits = AuditEventRepository::list_for_conversation(
            harness.store.as_ref(),
            conversation.id,
        )
        .await
        .expect("audit");
        assert!(audits.is_empty());
    }

    #[tokio::test]
    async fn negotiating_contact_choosing_the_handoff_menu_stays_negotiating() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("Claro, me conta o que precisa."))
            .build()
            .await;
        harness.past_greeting(returning(6)).await;
        harness.set_status(KanbanStatus::Negotiating).await;

        for text in ["falar com atendente", "2"] {
            let outcome = harness.send(text).await;
            assert!(
                matches!(outcome, TurnOutcome::Replied { escalated: false, .. }),
                "{text}: {outcome:?}"
            );
            let reply = reply_of(&outcome);
            assert!(reply.starts_with(NEGOTIATING_BANNER));
            assert!(!reply.contains(HANDOFF_MENU_REPLY));
            assert_eq!(harness.contact().await.status, KanbanStatus::Negotiating);
        }

        let next = harness.send("e aí?").await;
        assert!(matches!(next, TurnOutcome::Replied { .. }));
    }

    #[tokio::test]
    async fn transfer_phrase_escalates_with_audit_trail() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying(
            "Vou transferir você para um atendente agora mesmo.",
        ))
        .build()
        .await;
        harness.past_greeting(returning(4)).await;

        let outcome = harness.send("vocês entregam no sábado?").await;

        assert!(matches!(outcome, TurnOutcome::Replied { route: Route::Ai, escalated: true, .. }));
        assert_eq!(harness.contact().await.status, KanbanStatus::Negotiating);
        let conversation = harness.conversation().await;
        assert_eq!(conversation.status, ConversationStatus::PendingHuman);
        let audits = AuditEventRepository::list_for_conversation(
            harness.store.as_ref(),
            conversation.id,
        )
        .await
        .expect("audit");
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].category, AuditCategory::Escalation);
        assert_eq!(audits[0].metadata.get("reason").map(String::as_str), Some("transfer_phrase"));
    }

    #[tokio::test]
    async fn transfer_rule_hands_off_with_its_own_reply() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("Posso ajudar com isso."))
            .transfer_rules(vec![TransferRule {
                signal: TransferSignal::Keyword,
                value: "reclamação".to_owned(),
                action: "transfer".to_owned(),
            }])
            .build()
            .await;
        harness.past_greeting(returning(4)).await;

        let outcome = harness.send("quero registrar uma reclamação do pedido").await;

        assert!(matches!(outcome, TurnOutcome::Replied { escalated: true, .. }));
        assert!(reply_of(&outcome).contains("Vou transferir você para um atendente humano"));
    }

    #[tokio::test]
    async fn show_more_past_the_end_escalates() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("Temos estas opções.")).build().await;
        harness
            .past_greeting(DialogueState {
                automated_reply_count: 5,
                last_list_index: Some(1),
                ..DialogueState::default()
            })
            .await;
        let conversation = harness.conversation().await;
        crate::testing::seed_contact_message(&harness.store, conversation.id, "tem amoxicilina?")
            .await;

        let outcome = harness.send("manda mais").await;

        assert!(matches!(outcome, TurnOutcome::Replied { escalated: true, .. }));
        assert_eq!(reply_of(&outcome), HANDOFF_REPLY);
        assert_eq!(harness.contact().await.status, KanbanStatus::Negotiating);
    }

    #[tokio::test]
    async fn archived_contact_is_reset_and_served() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("Bom dia!")).build().await;
        harness.past_greeting(returning(3)).await;
        harness.set_status(KanbanStatus::Archived).await;

        let outcome = harness.send("bom dia, tem paracetamol?").await;

        assert!(matches!(outcome, TurnOutcome::Replied { .. }));
        assert_eq!(harness.contact().await.status, KanbanStatus::NewContact);
    }

    #[tokio::test]
    async fn stale_pending_handoff_is_reclaimed() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("Claro!")).build().await;
        harness.past_greeting(returning(3)).await;
        let conversation = harness.conversation().await;
        ConversationRepository::update_status(
            harness.store.as_ref(),
            conversation.id,
            ConversationStatus::PendingHuman,
        )
        .await
        .expect("status");

        let outcome = harness.send("tem dipirona?").await;

        assert!(matches!(outcome, TurnOutcome::Replied { .. }));
        assert_eq!(harness.conversation().await.status, ConversationStatus::BotHandling);
    }

    #[tokio::test]
    async fn slow_model_times_out_into_fallback_reply() {
        let config = OrchestratorConfig { call_timeout_secs: 1, ..OrchestratorConfig::default() };
        let harness = HarnessBuilder::new(
            ScriptedLlm::replying("tarde demais").delayed(Duration::from_secs(3)),
        )
        .config(config)
        .build()
        .await;
        harness.past_greeting(returning(2)).await;

        let outcome = harness.send("tem dipirona?").await;

        assert!(matches!(outcome, TurnOutcome::Replied { route: Route::Fallback, .. }));
        assert_eq!(reply_of(&outcome), ERROR_FALLBACK_REPLY);
        let state = harness.conversation().await.dialogue.expect("dialogue");
        assert_eq!(state.automated_reply_count, 3);
    }

    #[tokio::test]
    async fn failing_model_banner_still_applies_when_negotiating() {
        let harness = HarnessBuilder::new(ScriptedLlm::failing()).build().await;
        harness.past_greeting(returning(2)).await;
        harness.set_status(KanbanStatus::Negotiating).await;

        let outcome = harness.send("e o preço?").await;

        assert_eq!(reply_of(&outcome), format!("{NEGOTIATING_BANNER}{ERROR_FALLBACK_REPLY}"));
    }

    #[tokio::test]
    async fn inactive_bot_answers_without_calling_model() {
        let harness =
            HarnessBuilder::new(ScriptedLlm::replying("não usado")).inactive_bot().build().await;
        harness.past_greeting(returning(2)).await;

        let outcome = harness.send("tem dipirona?").await;

        assert_eq!(reply_of(&outcome), INACTIVE_REPLY);
        assert!(harness.llm.requests().await.is_empty());
    }

    #[tokio::test]
    async fn billing_menu_document_statements_and_unblock() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("não usado"))
            .billing(FakeBilling::with_customer())
            .build()
            .await;
        harness.past_greeting(returning(2)).await;

        let asked = harness.send("consultar faturas").await;
        assert_eq!(reply_of(&asked), ASK_DOCUMENT_INQUIRY);
        let state = harness.conversation().await.dialogue.expect("dialogue");
        assert_eq!(state.awaiting, Awaiting::Document(BillingAction::Inquiry));

        let listed = harness.send("084.844.316-06").await;
        assert!(matches!(listed, TurnOutcome::Replied { route: Route::Billing, .. }));
        assert!(reply_of(&listed).contains("Responda *sim* ou *não*"));
        assert_eq!(harness.transport.documents().await.len(), 2);
        let state = harness.conversation().await.dialogue.expect("dialogue");
        assert_eq!(state.awaiting, Awaiting::UnblockConfirmation);
        assert_eq!(state.known_document.as_deref(), Some("08484431606"));

        let unblocked = harness.send("sim").await;
        assert!(matches!(unblocked, TurnOutcome::Replied { route: Route::Billing, .. }));
        assert_eq!(harness.billing.unblocks().await, vec!["cus-1".to_owned()]);
        let state = harness.conversation().await.dialogue.expect("dialogue");
        assert_eq!(state.awaiting, Awaiting::None);

        let conversation = harness.conversation().await;
        let audits = AuditEventRepository::list_for_conversation(
            harness.store.as_ref(),
            conversation.id,
        )
        .await
        .expect("audit");
        assert!(audits.iter().any(|event| event.event_type == "billing.inquiry"));
        assert!(audits.iter().any(|event| event.event_type == "billing.unblock"));
    }

    #[tokio::test]
    async fn billing_without_credentials_says_so() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("não usado"))
            .without_billing()
            .build()
            .await;
        harness.past_greeting(returning(2)).await;

        let outcome = harness.send("quero a segunda via do boleto, cpf 08484431606").await;

        assert!(matches!(outcome, TurnOutcome::Replied { route: Route::Billing, .. }));
        assert_eq!(reply_of(&outcome), NOT_CONFIGURED_INQUIRY);
        let conversation = harness.conversation().await;
        let audits = AuditEventRepository::list_for_conversation(
            harness.store.as_ref(),
            conversation.id,
        )
        .await
        .expect("audit");
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].category, AuditCategory::Billing);
        assert_eq!(audits[0].outcome, AuditOutcome::Failed);
        assert_eq!(audits[0].event_type, "billing.inquiry");
    }

    #[tokio::test]
    async fn undeliverable_replies_are_still_recorded() {
        let harness = HarnessBuilder::new(ScriptedLlm::with_replies(&[
            "Temos Dipirona 1g por R$ 8,90.",
            "Paracetamol 750mg sai por R$ 12,50.",
        ]))
        .transport(RecordingTransport::failing())
        .build()
        .await;
        harness.past_greeting(returning(2)).await;

        let first = harness.send("tem dipirona?").await;
        let second = harness.send("tem paracetamol?").await;

        assert_eq!(reply_of(&first), "Temos Dipirona 1g por R$ 8,90.");
        assert_eq!(reply_of(&second), "Paracetamol 750mg sai por R$ 12,50.");
        assert!(harness.transport.texts().await.is_empty());
        let conversation = harness.conversation().await;
        let bot_replies: Vec<_> = harness
            .store
            .transcript(conversation.id)
            .await
            .into_iter()
            .filter(|message| message.sender == SenderKind::Bot)
            .map(|message| message.content)
            .collect();
        assert_eq!(
            bot_replies,
            ["Temos Dipirona 1g por R$ 8,90.", "Paracetamol 750mg sai por R$ 12,50."]
        );
        assert_eq!(conversation.dialogue.expect("dialogue").automated_reply_count, 4);
    }

    #[tokio::test]
    async fn explicit_human_request_waits_for_attendant() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("não usado")).build().await;
        harness.past_greeting(returning(2)).await;

        let outcome = harness.send("quero falar com uma pessoa de verdade").await;

        assert!(matches!(outcome, TurnOutcome::Replied { route: Route::Scripted, .. }));
        assert_eq!(harness.contact().await.status, KanbanStatus::WaitingAttendant);
        assert_eq!(harness.conversation().await.status, ConversationStatus::PendingHuman);

        let next = harness.send("alô?").await;
        assert_eq!(next, TurnOutcome::Silent { reason: SilentReason::WaitingForHuman });
    }

    #[tokio::test]
    async fn legacy_conversation_rebuilds_state_from_transcript() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("não usado")).build().await;
        let conversation = harness.conversation().await;
        crate::testing::seed_bot_message(
            &harness.store,
            conversation.id,
            "Olá! Para começar, qual é o seu nome? 😊",
        )
        .await;
        harness.store.overwrite_dialogue(conversation.id, None).await.expect("legacy");

        let outcome = harness.send("joão pedro").await;

        assert!(reply_of(&outcome).contains("Muito prazer, *João*"));
        let state = harness.conversation().await.dialogue.expect("dialogue");
        assert_eq!(state.automated_reply_count, 2);
    }

    #[tokio::test]
    async fn untranscribable_audio_is_treated_as_greeting_text() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("Oi! Como posso ajudar?"))
            .media(FakeMedia::default())
            .build()
            .await;
        harness.past_greeting(returning(2)).await;
        let mut message = harness.message("");
        message.media = Some(MediaInput {
            kind: relaydesk_core::MessageKind::Audio,
            url: Some("https://mmg.example/audio.ogg".to_owned()),
            base64: None,
            mime_type: Some("audio/ogg".to_owned()),
        });

        let outcome = harness.orchestrator.process_incoming_message(message).await.expect("turn");

        assert!(matches!(outcome, TurnOutcome::Replied { route: Route::Ai, .. }));
        let conversation = harness.conversation().await;
        let transcript = harness.store.transcript(conversation.id).await;
        assert_eq!(transcript[0].content, AUDIO_FAILURE_TEXT);
        let requests = harness.llm.requests().await;
        assert_eq!(requests[0].last().map(|turn| turn.content.as_text()), Some("oi".to_owned()));
    }

    #[tokio::test]
    async fn missing_contact_is_an_invariant_violation() {
        let harness = HarnessBuilder::new(ScriptedLlm::replying("olá")).build().await;
        let mut message = harness.message("oi");
        message.contact_id = ContactId(9_999);

        let error = harness.orchestrator.process_incoming_message(message).await.expect_err("missing");

        assert!(matches!(
            error,
            relaydesk_core::ApplicationError::Domain(
                relaydesk_core::DomainError::InvariantViolation(_)
            )
        ));
    }

    #[tokio::test]
    async fn concurrent_turns_for_one_contact_are_serialized() {
        let harness = Arc::new(
            HarnessBuilder::new(
                ScriptedLlm::replying("Temos sim.").delayed(Duration::from_millis(50)),
            )
            .build()
            .await,
        );
        harness.past_greeting(returning(2)).await;

        let first = {
            let harness = harness.clone();
            tokio::spawn(async move { harness.send("tem dipirona?").await })
        };
        let second = {
            let harness = harness.clone();
            tokio::spawn(async move { harness.send("tem paracetamol?").await })
        };
        first.await.expect("first turn");
        second.await.expect("second turn");

        let state = harness.conversation().await.dialogue.expect("dialogue");
        assert_eq!(state.automated_reply_count, 4);
        assert_eq!(harness.orchestrator.locks.len(), 1);
        let metadata = harness.contact().await.metadata;
        assert_eq!(metadata, ContactMetadata { unread: true, ..ContactMetadata::default() });
    }
}
