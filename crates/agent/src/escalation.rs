//! Handoff decisions for automated replies.
//!
//! The policy is an ordered table of [`EscalationRule`]s. Each rule names the
//! signal it looks for and the reply counts that must already exist before it
//! may fire. The first rule whose gate and signal both pass decides the
//! handoff; a contact already in `negotiating` is never escalated again.

use relaydesk_core::config::OrchestratorConfig;
use relaydesk_core::domain::bot_config::TransferRule;
use relaydesk_core::text;

use crate::detectors::IndecisionDetector;
use crate::rules::{any_phrase, Thresholds};

/// Phrases a reply uses when it is itself a handoff announcement.
pub const TRANSFER_PHRASES: &[&str] = &[
    "vou transferir você para um atendente",
    "vou transferir você agora para um atendente",
    "estou transferindo você para nossa equipe",
    "vou chamar um atendente humano",
    "vou chamar um consultor",
];

pub const FALLBACK_PHRASES: &[&str] = &[
    "não tenho informação",
    "não possuo informação",
    "não sei informar",
    "não possuo os dados",
    "não encontrei",
    "não consigo responder",
    "não posso fornecer",
    "não tenho acesso",
    "não está configurada",
    "não está disponível",
    "integração",
    "contato com o suporte",
    "procure um atendente",
    "não consigo acessar",
];

pub const HANDOFF_REPLY: &str = "Vou transferir você para um atendente humano para que ele possa \
te ajudar melhor. Aguarde só um instante, por favor.";

pub const TRANSFER_RULE_REPLY: &str =
    "Entendi! Vou transferir você para um atendente humano. Por favor, aguarde um momento.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscalationReason {
    TransferPhrase,
    LooseTransfer,
    FallbackPhrase,
    Indecision,
    TransferRule,
    CatalogExhausted,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransferPhrase => "transfer_phrase",
            Self::LooseTransfer => "loose_transfer",
            Self::FallbackPhrase => "fallback_phrase",
            Self::Indecision => "indecision",
            Self::TransferRule => "transfer_rule",
            Self::CatalogExhausted => "catalog_exhausted",
        }
    }
}

/// Everything the policy looks at for one turn.
#[derive(Clone, Copy, Debug)]
pub struct EscalationInput<'a> {
    pub reply: &'a str,
    pub user_message: &'a str,
    /// Bot replies recorded in the conversation before this one.
    pub automated_replies: u32,
    /// Bot replies inside the recency window, edges included.
    pub recent_automated_replies: u32,
    pub already_negotiating: bool,
    pub transfer_rules: &'a [TransferRule],
    pub catalog_exhausted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscalationDecision {
    Stay,
    Escalate { reason: EscalationReason, reply: String },
    AlreadyNegotiating,
}

impl EscalationDecision {
    pub fn is_escalation(&self) -> bool {
        matches!(self, Self::Escalate { .. })
    }
}

type Signal = fn(&EscalationPolicy, &EscalationInput<'_>) -> bool;

#[derive(Clone, Copy)]
pub struct EscalationRule {
    pub reason: EscalationReason,
    pub min_total: u32,
    pub min_recent: u32,
    signal: Signal,
}

impl std::fmt::Debug for EscalationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationRule")
            .field("reason", &self.reason)
            .field("min_total", &self.min_total)
            .field("min_recent", &self.min_recent)
            .finish()
    }
}

impl EscalationRule {
    fn gate_open(&self, input: &EscalationInput<'_>) -> bool {
        input.automated_replies >= self.min_total
            && input.recent_automated_replies >= self.min_recent
    }
}

#[derive(Clone, Debug)]
pub struct EscalationPolicy {
    rules: Vec<EscalationRule>,
    indecision: IndecisionDetector,
    thresholds: Thresholds,
}

impl EscalationPolicy {
    pub fn new(config: &OrchestratorConfig, thresholds: Thresholds) -> Self {
        let floor = config.min_automated_replies;
        let rules = vec![
            EscalationRule {
                reason: EscalationReason::TransferPhrase,
                min_total: floor,
                min_recent: 0,
                signal: |_, input| any_phrase(&text::fold(input.reply), TRANSFER_PHRASES),
            },
            EscalationRule {
                reason: EscalationReason::LooseTransfer,
                min_total: floor,
                min_recent: config.loose_transfer_min_recent,
                signal: |_, input| {
                    let folded = text::fold(input.reply);
                    ["transferir", "atendente", "humano"].iter().all(|term| folded.contains(term))
                },
            },
            EscalationRule {
                reason: EscalationReason::FallbackPhrase,
                min_total: floor,
                min_recent: config.fallback_min_recent,
                signal: |_, input| any_phrase(&text::fold(input.reply), FALLBACK_PHRASES),
            },
            EscalationRule {
                reason: EscalationReason::Indecision,
                min_total: floor.max(config.indecision_min_replies),
                min_recent: 0,
                signal: |policy, input| {
                    policy.indecision.detect(input.user_message).confidence
                        > policy.thresholds.indecision_escalate
                },
            },
            EscalationRule {
                reason: EscalationReason::TransferRule,
                min_total: floor,
                min_recent: 0,
                signal: |_, input| {
                    input.transfer_rules.iter().any(|rule| rule.matches(input.user_message))
                },
            },
            EscalationRule {
                reason: EscalationReason::CatalogExhausted,
                min_total: floor,
                min_recent: 0,
                signal: |_, input| input.catalog_exhausted,
            },
        ];
        Self { rules, indecision: IndecisionDetector::new(thresholds), thresholds }
    }

    pub fn rules(&self) -> &[EscalationRule] {
        &self.rules
    }

    pub fn evaluate(&self, input: &EscalationInput<'_>) -> EscalationDecision {
        if input.already_negotiating {
            return EscalationDecision::AlreadyNegotiating;
        }

        let Some(rule) =
            self.rules.iter().find(|rule| rule.gate_open(input) && (rule.signal)(self, input))
        else {
            return EscalationDecision::Stay;
        };

        let reply = match rule.reason {
            EscalationReason::TransferPhrase => input.reply.to_owned(),
            EscalationReason::TransferRule => TRANSFER_RULE_REPLY.to_owned(),
            _ => HANDOFF_REPLY.to_owned(),
        };
        EscalationDecision::Escalate { reason: rule.reason, reply }
    }
}
