//! Declarative signal tables.
//!
//! Every keyword heuristic in the engine is a [`SignalRule`]: a list of folded
//! phrases plus the confidence tiers that turn a match count into a score. The
//! decision thresholds live in [`Thresholds`] so they can be tuned and tested
//! without touching control flow.

use std::collections::BTreeSet;

use relaydesk_core::text;

/// Confidence for `n >= min_matches` is `base + step * (n - min_matches)`,
/// capped at `cap`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfidenceTier {
    pub min_matches: usize,
    pub base: f32,
    pub step: f32,
    pub cap: f32,
}

impl ConfidenceTier {
    pub const fn new(min_matches: usize, base: f32, step: f32, cap: f32) -> Self {
        Self { min_matches, base, step, cap }
    }

    fn score(&self, matches: usize) -> f32 {
        let extra = matches.saturating_sub(self.min_matches) as f32;
        (self.base + self.step * extra).min(self.cap)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SignalRule {
    pub name: &'static str,
    pub signals: &'static [&'static str],
    /// Checked highest `min_matches` first.
    pub tiers: &'static [ConfidenceTier],
}

impl SignalRule {
    /// Distinct signals present in already-folded text. Accented and plain
    /// spellings of the same word count once, and a matched signal nested
    /// inside another matched signal ("tenho duvida" in "tenho duvidas") is
    /// not counted again.
    pub fn count(&self, folded: &str) -> usize {
        let matched: Vec<String> = self
            .signals
            .iter()
            .map(|signal| text::fold(signal))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|signal| folded.contains(signal.as_str()))
            .collect();
        matched
            .iter()
            .filter(|signal| {
                !matched.iter().any(|other| other != *signal && other.contains(signal.as_str()))
            })
            .count()
    }

    pub fn score_count(&self, matches: usize) -> Option<f32> {
        self.tiers
            .iter()
            .filter(|tier| matches >= tier.min_matches && matches > 0)
            .max_by_key(|tier| tier.min_matches)
            .map(|tier| tier.score(matches))
    }

    pub fn score(&self, folded: &str) -> Option<f32> {
        self.score_count(self.count(folded))
    }
}

/// Any of the phrases, folded, appears in the folded text.
pub fn any_phrase(folded: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| folded.contains(text::fold(phrase).as_str()))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    /// Billing intents run the billing flow above this confidence.
    pub intent: f32,
    /// Human-request detections hand off above this confidence.
    pub human_request: f32,
    /// Indecision is reported from this confidence up.
    pub indecision_report: f32,
    /// Indecision escalates above this confidence.
    pub indecision_escalate: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { intent: 0.5, human_request: 0.5, indecision_report: 0.65, indecision_escalate: 0.8 }
    }
}
