use thiserror::Error;

use crate::domain::billing::TaxDocument;
use crate::flows::states::{Awaiting, DialogueEvent, DialogueState, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> DialogueState;
    fn transition(
        &self,
        current: &DialogueState,
        event: &DialogueEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The scripted customer dialogue: greeting, name capture, billing document
/// collection and the unblock confirmation sub-dialog.
#[derive(Clone, Debug, Default)]
pub struct DialogueFlow;

impl FlowDefinition for DialogueFlow {
    fn initial_state(&self) -> DialogueState {
        DialogueState::default()
    }

    fn transition(
        &self,
        current: &DialogueState,
        event: &DialogueEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_dialogue(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> DialogueState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &DialogueState,
        event: &DialogueEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    /// Applies events in order, stopping at the first rejected one.
    pub fn apply_all(
        &self,
        current: &DialogueState,
        events: &[DialogueEvent],
    ) -> Result<DialogueState, FlowTransitionError> {
        let mut state = current.clone();
        for event in events {
            state = self.apply(&state, event)?.state;
        }
        Ok(state)
    }

    /// Counts one more automated reply.
    pub fn record_reply(&self, current: &DialogueState) -> DialogueState {
        let mut next = current.clone();
        next.automated_reply_count = next.automated_reply_count.saturating_add(1);
        next
    }
}

impl Default for FlowEngine<DialogueFlow> {
    fn default() -> Self {
        Self::new(DialogueFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: Awaiting, event: DialogueEvent },
    #[error("document `{value}` is not an 11 or 14 digit taxpayer id")]
    InvalidDocument { value: String },
}

fn transition_dialogue(
    current: &DialogueState,
    event: &DialogueEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use DialogueEvent::{
        CatalogListed, CatalogReset, DocumentRequested, DocumentSupplied, ExpectationDropped,
        GreetingSent, HandedOff, NameCaptured, UnblockAnswered, UnblockOffered,
    };

    let invalid = || FlowTransitionError::InvalidTransition {
        state: current.awaiting,
        event: event.clone(),
    };

    let mut next = current.clone();
    match (current.awaiting, event) {
        (_, GreetingSent) if current.is_first_contact() => next.awaiting = Awaiting::Name,
        (_, GreetingSent) => return Err(invalid()),
        (Awaiting::Name, NameCaptured) => next.awaiting = Awaiting::None,
        (_, NameCaptured) => return Err(invalid()),
        (_, ExpectationDropped) | (_, HandedOff) => next.awaiting = Awaiting::None,
        (_, DocumentRequested(action)) => next.awaiting = Awaiting::Document(*action),
        (awaiting, DocumentSupplied(value)) => {
            let document = TaxDocument::from_digits(value)
                .ok_or_else(|| FlowTransitionError::InvalidDocument { value: value.clone() })?;
            next.known_document = Some(document.digits().to_owned());
            if matches!(awaiting, Awaiting::Document(_)) {
                next.awaiting = Awaiting::None;
            }
        }
        (_, UnblockOffered) => next.awaiting = Awaiting::UnblockConfirmation,
        (Awaiting::UnblockConfirmation, UnblockAnswered) => next.awaiting = Awaiting::None,
        (_, UnblockAnswered) => return Err(invalid()),
        (_, CatalogListed { last_index }) => next.last_list_index = Some(*last_index),
        (_, CatalogReset) => next.last_list_index = None,
    }

    Ok(TransitionOutcome {
        from: current.awaiting,
        to: next.awaiting,
        event: event.clone(),
        state: next,
    })
}
