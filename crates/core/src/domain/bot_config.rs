use serde::{Deserialize, Serialize};

use crate::domain::workspace::WorkspaceId;
use crate::text;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotConfig {
    pub workspace_id: WorkspaceId,
    pub master_prompt: Option<String>,
    pub is_active: bool,
    pub transfer_rules: Vec<TransferRule>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferSignal {
    Keyword,
    Phrase,
    Sentiment,
}

/// Operator-defined handoff trigger evaluated against the customer's message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRule {
    #[serde(rename = "type")]
    pub signal: TransferSignal,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub action: String,
}

const NEGATIVE_SENTIMENT_WORDS: &[&str] =
    &["ruim", "pessimo", "horrivel", "problema", "reclamar", "insatisfeito"];

impl TransferRule {
    pub fn matches(&self, message: &str) -> bool {
        let folded = text::fold(message);
        let value = text::fold(self.value.trim());
        match self.signal {
            TransferSignal::Keyword => !value.is_empty() && folded.contains(&value),
            TransferSignal::Phrase => !value.is_empty() && folded.trim() == value,
            TransferSignal::Sentiment => text::contains_any(&folded, NEGATIVE_SENTIMENT_WORDS),
        }
    }
}
