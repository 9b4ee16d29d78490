//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::*;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_outcome() -> impl Strategy<Value = StreamOutcome> {
    prop_oneof![
        Just(StreamOutcome::Completed),
        Just(StreamOutcome::Cancelled),
        "[a-z ]{0,12}".prop_map(|message| StreamOutcome::Failed { message }),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        (1u64..6, 0u64..20, any::<bool>()).prop_map(|(session_id, target_index, allow_partial_save)| {
            Event::Submit {
                session_id,
                target_index,
                allow_partial_save,
            }
        }),
        (1u64..6, arb_outcome())
            .prop_map(|(session_id, outcome)| Event::StreamFinished { session_id, outcome }),
        (1u64..6).prop_map(|session_id| Event::Settle { session_id }),
    ]
}

fn arb_state() -> impl Strategy<Value = OrchestratorState> {
    prop_oneof![
        Just(OrchestratorState::Idle),
        (1u64..6, 0u64..20, any::<bool>()).prop_map(|(session_id, target_index, allow_partial_save)| {
            OrchestratorState::Sending {
                session_id,
                target_index,
                allow_partial_save,
            }
        }),
        (1u64..6, 0u64..20).prop_map(|(session_id, target_index)| OrchestratorState::Completed {
            session_id,
            target_index
        }),
        (1u64..6, 0u64..20).prop_map(|(session_id, target_index)| OrchestratorState::Cancelled {
            session_id,
            target_index
        }),
    ]
}

proptest! {
    /// Stream results for any session other than the sending one change nothing.
    #[test]
    fn prop_stale_results_are_inert(state in arb_state(), session_id in 1u64..6, outcome in arb_outcome()) {
        let current = match &state {
            OrchestratorState::Sending { session_id, .. } => Some(*session_id),
            _ => None,
        };
        prop_assume!(current != Some(session_id));

        let result = transition(&state, Event::StreamFinished { session_id, outcome });
        prop_assert_eq!(result.new_state, state);
        prop_assert!(result.effects.is_empty());
    }

    /// Submitting always ends in Sending for the new session, and a replaced
    /// session is always abandoned.
    #[test]
    fn prop_submit_supersedes(state in arb_state(), session_id in 1u64..6, target_index in 0u64..20) {
        let result = transition(&state, Event::Submit { session_id, target_index, allow_partial_save: true });
        prop_assert!(result.new_state.is_sending());
        prop_assert_eq!(result.new_state.session_id(), Some(session_id));

        if let OrchestratorState::Sending { session_id: previous, target_index: previous_target, allow_partial_save } = state {
            if previous == session_id {
                prop_assert!(result.effects.is_empty());
            } else {
                prop_assert_eq!(
                    result.effects,
                    vec![Effect::AbandonSession { session_id: previous, target_index: previous_target, allow_partial_save }]
                );
            }
        } else {
            prop_assert!(result.effects.is_empty());
        }
    }

    /// Every finish of the current session releases construction and trims.
    #[test]
    fn prop_finish_releases_and_trims(
        session_id in 1u64..6,
        target_index in 0u64..20,
        allow_partial_save in any::<bool>(),
        outcome in arb_outcome(),
    ) {
        let state = OrchestratorState::Sending { session_id, target_index, allow_partial_save };
        let result = transition(&state, Event::StreamFinished { session_id, outcome });

        prop_assert!(result.new_state.is_terminal());
        prop_assert_eq!(result.effects.first(), Some(&Effect::FinishConstruction { target_index }));
        prop_assert!(result.effects.contains(&Effect::Trim));
    }

    /// Any event sequence keeps at most one session in Sending, and that
    /// session is the last submitted one until it finishes.
    #[test]
    fn prop_single_active_session(events in prop::collection::vec(arb_event(), 0..40)) {
        let mut state = OrchestratorState::Idle;
        let mut last_submitted: Option<u64> = None;

        for event in events {
            if let Event::Submit { session_id, .. } = &event {
                last_submitted = Some(*session_id);
            }
            state = transition(&state, event).new_state;
            if state.is_sending() {
                prop_assert_eq!(state.session_id(), last_submitted);
            }
        }
    }
}
