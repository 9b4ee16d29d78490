//! Orchestrator state types

/// Lifecycle of the current turn
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OrchestratorState {
    /// No response in flight
    #[default]
    Idle,

    /// A stream session is writing into `target_index`
    Sending {
        session_id: u64,
        target_index: u64,
        allow_partial_save: bool,
    },

    /// The session finished normally
    Completed { session_id: u64, target_index: u64 },

    /// The session was stopped before the server finished
    Cancelled { session_id: u64, target_index: u64 },

    /// Transport failure; the fallback or partial reply was kept
    Failed {
        session_id: u64,
        target_index: u64,
        message: String,
    },
}

impl OrchestratorState {
    pub fn is_sending(&self) -> bool {
        matches!(self, Self::Sending { .. })
    }

    /// Session the state refers to, if any.
    pub fn session_id(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::Sending { session_id, .. }
            | Self::Completed { session_id, .. }
            | Self::Cancelled { session_id, .. }
            | Self::Failed { session_id, .. } => Some(*session_id),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }
}
