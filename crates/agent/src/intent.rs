use relaydesk_core::domain::billing::TaxDocument;
use relaydesk_core::flows::BillingAction;
use relaydesk_core::text;

use crate::document::extract_document;
use crate::rules::{any_phrase, ConfidenceTier, SignalRule};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    BillingInquiry,
    UnblockRequest,
    None,
}

impl Intent {
    pub fn billing_action(&self) -> Option<BillingAction> {
        match self {
            Self::BillingInquiry => Some(BillingAction::Inquiry),
            Self::UnblockRequest => Some(BillingAction::Unblock),
            Self::None => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntentMatch {
    pub intent: Intent,
    pub confidence: f32,
    /// Extracted once here; downstream flows reuse it instead of re-extracting.
    pub document: Option<TaxDocument>,
}

impl IntentMatch {
    pub fn is_actionable(&self, threshold: f32) -> bool {
        self.intent != Intent::None && self.confidence > threshold
    }
}

pub const UNBLOCK_PHRASES: &[&str] = &[
    "desbloqueio de confiança",
    "desbloqueio de confianca",
    "liberar minha internet",
    "liberar a internet",
    "quero desbloquear",
    "desbloquear minha internet",
    "internet bloqueada",
    "internet cortada",
];

pub const UNBLOCK_RULE: SignalRule = SignalRule {
    name: "unblock_request",
    signals: &[
        "desbloquear",
        "desbloqueio",
        "liberar",
        "liberação",
        "internet",
        "conexão",
        "bloqueado",
        "bloqueio",
        "confiança",
        "confian",
        "acesso",
    ],
    tiers: &[ConfidenceTier::new(1, 0.4, 0.4, 0.9)],
};

pub const BILLING_RULE: SignalRule = SignalRule {
    name: "billing_inquiry",
    signals: &[
        "fatura",
        "boleto",
        "conta",
        "débito",
        "dívida",
        "devendo",
        "pagar",
        "pagamento",
        "vencimento",
        "atrasado",
        "pendente",
        "segunda via",
        "2 via",
        "2ª via",
        "cpf",
        "cnpj",
        "quanto",
    ],
    tiers: &[ConfidenceTier::new(1, 0.3, 0.3, 0.9)],
};

const PHRASE_CONFIDENCE: f32 = 0.95;
const DOCUMENT_CONFIDENCE: f32 = 0.95;

/// Keyword classifier for billing intents. Rules are evaluated in order and the
/// first one that fires wins.
#[derive(Clone, Debug)]
pub struct IntentClassifier {
    unblock_phrases: &'static [&'static str],
    unblock: SignalRule,
    billing: SignalRule,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self { unblock_phrases: UNBLOCK_PHRASES, unblock: UNBLOCK_RULE, billing: BILLING_RULE }
    }
}

impl IntentClassifier {
    pub fn classify(&self, message: &str) -> IntentMatch {
        let folded = text::fold(message);
        let document = extract_document(message);
        let matched = |intent, confidence| IntentMatch {
            intent,
            confidence,
            document: document.clone(),
        };

        if any_phrase(&folded, self.unblock_phrases) {
            return matched(Intent::UnblockRequest, PHRASE_CONFIDENCE);
        }
        if let Some(confidence) = self.unblock.score(&folded) {
            return matched(Intent::UnblockRequest, confidence);
        }
        if document.is_some() {
            return matched(Intent::BillingInquiry, DOCUMENT_CONFIDENCE);
        }
        if let Some(confidence) = self.billing.score(&folded) {
            return matched(Intent::BillingInquiry, confidence);
        }
        matched(Intent::None, 0.0)
    }
}
