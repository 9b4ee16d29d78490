//! Turn lifecycle state machine
//!
//! Pure transitions: the orchestrator feeds events in and executes the
//! returned effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::{Event, StreamOutcome};
pub use state::OrchestratorState;
pub use transition::{transition, TransitionResult};
