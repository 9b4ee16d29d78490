//! Events that drive the turn lifecycle

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A user message was appended and a stream session registered for it
    Submit {
        session_id: u64,
        target_index: u64,
        allow_partial_save: bool,
    },

    /// The stream for `session_id` ended
    StreamFinished {
        session_id: u64,
        outcome: StreamOutcome,
    },

    /// Post-processing for the finished session is done
    Settle { session_id: u64 },
}

/// How a stream session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    Failed { message: String },
}
