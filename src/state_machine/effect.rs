//! Effects produced by state transitions

/// Effects to be executed after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A newer submit took over; the old session no longer owns its turn.
    /// Without partial save the turn is redrawn from the log.
    AbandonSession {
        session_id: u64,
        target_index: u64,
        allow_partial_save: bool,
    },

    /// Release the construction mark on the target turn
    FinishConstruction { target_index: u64 },

    /// Write the accumulated reply into the log
    WriteFinal { target_index: u64 },

    /// Redraw the target turn from the log (discarding display-only text)
    RenderFromLog { target_index: u64 },

    /// Apply the trim limit
    Trim,

    /// Forward the finished reply to signal sinks
    ForwardSignal { target_index: u64 },

    /// Ask the expression classifier about the finished reply
    ClassifyExpression { target_index: u64 },
}
