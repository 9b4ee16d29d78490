//! Trait abstractions for runtime I/O
//!
//! The orchestrator only sees the display through this port, so it can be
//! driven by a terminal, a test recorder or anything else.

use crate::expression::Expression;
use std::sync::Arc;

/// Display surface for the conversation
pub trait RenderPort: Send + Sync {
    /// Show a new turn as `[<display_name>:] <text>`.
    fn render_turn(&self, display_name: &str, text: &str, index: u64);

    /// Replace the content of a shown turn, keeping its speaker.
    fn update_turn(&self, index: u64, text: &str);

    fn remove_turn(&self, index: u64);

    /// Rendered text of every shown turn in index order, speaker prefix included.
    fn rendered_turns(&self) -> Vec<(u64, String)>;

    fn clear(&self);

    fn show_expression(&self, expression: Expression);
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

impl<T: RenderPort + ?Sized> RenderPort for Arc<T> {
    fn render_turn(&self, display_name: &str, text: &str, index: u64) {
        (**self).render_turn(display_name, text, index);
    }

    fn update_turn(&self, index: u64, text: &str) {
        (**self).update_turn(index, text);
    }

    fn remove_turn(&self, index: u64) {
        (**self).remove_turn(index);
    }

    fn rendered_turns(&self) -> Vec<(u64, String)> {
        (**self).rendered_turns()
    }

    fn clear(&self) {
        (**self).clear();
    }

    fn show_expression(&self, expression: Expression) {
        (**self).show_expression(expression);
    }
}
