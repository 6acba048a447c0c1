use relaydesk_core::text;

use crate::rules::{any_phrase, ConfidenceTier, SignalRule, Thresholds};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub detected: bool,
    pub confidence: f32,
}

impl Detection {
    const NONE: Self = Self { detected: false, confidence: 0.0 };

    fn found(confidence: f32) -> Self {
        Self { detected: true, confidence }
    }
}

/// Messages that are only a greeting never count as a handoff request.
const SIMPLE_GREETINGS: &[&str] = &[
    "boa noite",
    "boa tarde",
    "bom dia",
    "oi",
    "ola",
    "eae",
    "e ai",
    "opa",
    "salve",
    "oi tudo bem",
    "ola tudo bem",
    "oi boa noite",
    "oi boa tarde",
    "oi bom dia",
    "ola boa noite",
    "ola boa tarde",
    "ola bom dia",
];

const HUMAN_PHRASES: &[&str] = &[
    "quero falar com atendente",
    "preciso falar com atendente",
    "pode me passar para um atendente",
    "me transfere para atendente",
    "quero atendimento humano",
    "quero falar com uma pessoa",
    "você é bot",
    "é robô",
    "não é bot",
    "quero falar com alguém",
    "preciso de um atendente",
    "me conecte com atendente",
];

const HUMAN_RULE: SignalRule = SignalRule {
    name: "human_request",
    signals: &[
        "atendente",
        "humano",
        "pessoa",
        "alguém",
        "operador",
        "operadora",
        "gerente",
        "supervisor",
        "falar com",
        "preciso falar",
        "quero falar",
        "transferir",
        "transfere",
        "não é bot",
        "você é bot",
        "é robô",
    ],
    tiers: &[ConfidenceTier::new(2, 0.7, 0.1, 0.9)],
};

const EXPLICIT_CONFIDENCE: f32 = 0.9;

/// Customer explicitly asking for a person.
#[derive(Clone, Debug, Default)]
pub struct HumanRequestDetector;

impl HumanRequestDetector {
    pub fn detect(&self, message: &str) -> Detection {
        if SIMPLE_GREETINGS.contains(&text::fold_words(message).as_str()) {
            return Detection::NONE;
        }
        let folded = text::fold(message);
        if any_phrase(&folded, HUMAN_PHRASES) {
            return Detection::found(EXPLICIT_CONFIDENCE);
        }
        HUMAN_RULE.score(&folded).map_or(Detection::NONE, Detection::found)
    }
}

const INDECISION_RULE: SignalRule = SignalRule {
    name: "indecision",
    signals: &[
        "ainda não decidi",
        "não decidi ainda",
        "estou pensando em comprar",
        "preciso pensar em comprar",
        "preciso pensar se compro",
        "vou pensar se compro",
        "preciso conversar antes",
        "preciso consultar alguém",
        "preciso conversar com alguém",
        "não quero agora",
        "não posso agora",
        "depois eu vejo",
        "depois eu penso",
        "mais tarde eu vejo",
        "outro dia eu compro",
        "deixa pra depois",
        "deixa para depois",
        "vou pensar melhor",
        "preciso pensar melhor",
        "não fecho agora",
        "não fecho a compra agora",
        "muito caro para mim",
        "está muito caro",
        "não tenho dinheiro",
        "não tenho condições",
        "preço alto demais",
        "não consigo decidir",
        "não sei qual escolher",
        "difícil escolher",
        "não sei qual é melhor",
        "ajuda para escolher",
        "ajuda para decidir",
        "me ajude a escolher",
        "me ajude a decidir",
        "qual você recomenda",
        "qual vc recomenda",
        "qual recomenda",
        "tenho dúvidas",
        "tenho dúvida",
        "estou em dúvida",
        "não tenho certeza se compro",
        "não estou certo se compro",
    ],
    tiers: &[ConfidenceTier::new(3, 0.7, 0.1, 0.9), ConfidenceTier::new(2, 0.65, 0.05, 0.85)],
};

const PURCHASE_CONTEXT: &[&str] =
    &["comprar", "compra", "fechar", "pedido", "levar", "escolher", "decidir"];

/// A single indecision signal only counts next to purchase vocabulary.
const SINGLE_SIGNAL_WITH_CONTEXT: ConfidenceTier = ConfidenceTier::new(0, 0.7, 0.05, 0.8);

/// Customer stuck before closing a purchase.
#[derive(Clone, Debug, Default)]
pub struct IndecisionDetector {
    thresholds: Thresholds,
}

impl IndecisionDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn detect(&self, message: &str) -> Detection {
        let folded = text::fold(message.trim());
        let matches = INDECISION_RULE.count(&folded);
        let has_context = any_phrase(&folded, PURCHASE_CONTEXT);

        let confidence = match INDECISION_RULE.score_count(matches) {
            Some(confidence) => confidence,
            None if matches == 1 && has_context => {
                let tier = SINGLE_SIGNAL_WITH_CONTEXT;
                (tier.base + tier.step * matches as f32).min(tier.cap)
            }
            None => return Detection::NONE,
        };

        if confidence >= self.thresholds.indecision_report {
            Detection::found(confidence)
        } else {
            Detection::NONE
        }
    }
}

/// Personalized handoff text sent when the customer asks for a person.
pub fn transfer_message(first_name: Option<&str>) -> String {
    format!(
        "{}, entendo que você gostaria de falar com um atendente humano! 😊\n\n\
         Estou transferindo você para nossa equipe de atendimento agora mesmo. \
         Um de nossos atendentes entrará em contato com você em breve.\n\n\
         Aguarde só um momento, por favor! ⏳",
        first_name.unwrap_or("Olá")
    )
}
