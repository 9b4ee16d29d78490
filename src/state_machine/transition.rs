//! Pure state transition function

use super::{Effect, Event, OrchestratorState, StreamOutcome};

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: OrchestratorState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: OrchestratorState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    fn unchanged(state: &OrchestratorState) -> Self {
        Self::new(state.clone())
    }
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs. Every event is
/// accepted; events for a session other than the current one leave the state
/// unchanged and produce no effects.
pub fn transition(state: &OrchestratorState, event: Event) -> TransitionResult {
    match (state, event) {
        // ============================================================
        // Submit
        // ============================================================

        // Sending + Submit -> Sending (the previous session is superseded)
        (
            OrchestratorState::Sending {
                session_id: previous,
                target_index: previous_target,
                allow_partial_save: previous_partial_save,
            },
            Event::Submit {
                session_id,
                target_index,
                allow_partial_save,
            },
        ) => {
            if *previous == session_id {
                return TransitionResult::unchanged(state);
            }
            TransitionResult::new(OrchestratorState::Sending {
                session_id,
                target_index,
                allow_partial_save,
            })
            .with_effect(Effect::AbandonSession {
                session_id: *previous,
                target_index: *previous_target,
                allow_partial_save: *previous_partial_save,
            })
        }

        // Idle / terminal + Submit -> Sending
        (
            _,
            Event::Submit {
                session_id,
                target_index,
                allow_partial_save,
            },
        ) => TransitionResult::new(OrchestratorState::Sending {
            session_id,
            target_index,
            allow_partial_save,
        }),

        // ============================================================
        // Stream results
        // ============================================================
        (
            OrchestratorState::Sending {
                session_id: current,
                target_index,
                allow_partial_save,
            },
            Event::StreamFinished {
                session_id,
                outcome,
            },
        ) if *current == session_id => {
            finish(session_id, *target_index, *allow_partial_save, outcome)
        }

        // Stale or unexpected stream result
        (_, Event::StreamFinished { .. }) => TransitionResult::unchanged(state),

        // ============================================================
        // Settle
        // ============================================================
        (terminal, Event::Settle { session_id })
            if terminal.is_terminal() && terminal.session_id() == Some(session_id) =>
        {
            TransitionResult::new(OrchestratorState::Idle)
        }

        (_, Event::Settle { .. }) => TransitionResult::unchanged(state),
    }
}

fn finish(
    session_id: u64,
    target_index: u64,
    allow_partial_save: bool,
    outcome: StreamOutcome,
) -> TransitionResult {
    let release = Effect::FinishConstruction { target_index };
    match outcome {
        StreamOutcome::Completed => TransitionResult::new(OrchestratorState::Completed {
            session_id,
            target_index,
        })
        .with_effects([
            release,
            Effect::WriteFinal { target_index },
            Effect::Trim,
            Effect::ForwardSignal { target_index },
            Effect::ClassifyExpression { target_index },
        ]),

        StreamOutcome::Cancelled => {
            let keep = if allow_partial_save {
                Effect::WriteFinal { target_index }
            } else {
                Effect::RenderFromLog { target_index }
            };
            TransitionResult::new(OrchestratorState::Cancelled {
                session_id,
                target_index,
            })
            .with_effects([release, keep, Effect::Trim])
        }

        StreamOutcome::Failed { message } => TransitionResult::new(OrchestratorState::Failed {
            session_id,
            target_index,
            message,
        })
        .with_effects([release, Effect::WriteFinal { target_index }, Effect::Trim]),
    }
}
