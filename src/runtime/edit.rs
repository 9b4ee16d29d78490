//! History editing: delete, rewind, refresh, edit, clear and transcripts

use super::{ChatError, ChatResult, RenderPort, TurnOrchestrator, TurnOutcome};
use crate::llm::InferenceService;
use crate::memory::{transcript, Role};
use crate::state_machine::OrchestratorState;
use std::path::Path;

impl<L: InferenceService + 'static, R: RenderPort> TurnOrchestrator<L, R> {
    /// Remove a single turn. Returns `false` if it did not exist.
    pub fn delete(&self, index: u64) -> ChatResult<bool> {
        let mut core = self.lock();
        let removed = core.log.delete(index)?;
        self.renderer.remove_turn(index);
        Ok(removed)
    }

    /// Drop every turn with `index >= threshold` from the log and the display.
    pub fn rewind_to(&self, threshold: u64) -> ChatResult<Vec<u64>> {
        let mut core = self.lock();
        let removed = core.log.truncate_from(threshold)?;
        self.remove_rendered_from(threshold, &removed);
        Ok(removed)
    }

    /// Regenerate the reply at `assistant_index` from the user turn just
    /// before it. The old exchange is removed and a fresh pair is appended.
    pub async fn refresh_from(&self, assistant_index: u64) -> ChatResult<TurnOutcome> {
        let Some(user_index) = assistant_index.checked_sub(1) else {
            return Err(ChatError::NoUserTurn(assistant_index));
        };

        let user_text = {
            let mut core = self.lock();
            let text = match core.log.get(user_index) {
                Some(turn) if turn.role == Role::User => turn.content.clone(),
                _ => self
                    .recover_user_text(assistant_index)
                    .ok_or(ChatError::NoUserTurn(assistant_index))?,
            };

            if let Some(target) = self.controller.cancel_targeting_from(user_index) {
                core.log.finish_construction(target);
            }
            let removed = core.log.truncate_from(user_index)?;
            self.remove_rendered_from(user_index, &removed);
            text
        };

        tracing::info!(from = assistant_index, "Refreshing reply");
        self.run_turn(&user_text, false).await
    }

    /// Replace the content of a finished turn.
    pub fn edit_turn(&self, index: u64, content: &str) -> ChatResult<()> {
        let content = content.trim();
        let mut core = self.lock();
        core.log.edit(index, content)?;
        self.renderer.update_turn(index, content);
        Ok(())
    }

    /// Stop the in-flight response. Returns its target turn.
    pub fn stop(&self) -> Option<u64> {
        let _core = self.lock();
        self.controller.cancel_active()
    }

    /// Empty the log and the display.
    pub fn clear(&self) -> ChatResult<()> {
        let mut core = self.lock();
        if let Some(target) = self.controller.cancel_active() {
            core.log.finish_construction(target);
        }
        core.log.clear()?;
        core.state = OrchestratorState::Idle;
        self.renderer.clear();
        tracing::info!("Conversation cleared");
        Ok(())
    }

    pub async fn export_transcript(&self, path: &Path) -> ChatResult<()> {
        let text = {
            let core = self.lock();
            transcript::render(core.log.turns(), &self.names())
        };
        tokio::fs::write(path, text).await?;
        tracing::info!(path = %path.display(), "Transcript saved");
        Ok(())
    }

    /// Replace the conversation with a saved transcript. Returns the
    /// transcript's name (the file stem).
    pub async fn import_transcript(&self, path: &Path) -> ChatResult<String> {
        let text = tokio::fs::read_to_string(path).await?;
        let entries = transcript::parse(&text, &self.names());

        {
            let mut core = self.lock();
            if let Some(target) = self.controller.cancel_active() {
                core.log.finish_construction(target);
            }
            core.log.replace_all(entries)?;
            core.state = OrchestratorState::Idle;
            self.renderer.clear();
            self.render_all(core.log.turns());
            tracing::info!(path = %path.display(), turns = core.log.len(), "Transcript loaded");
        }

        Ok(path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default())
    }

    /// Last displayed user line before `index`, for when the log lost it.
    fn recover_user_text(&self, index: u64) -> Option<String> {
        let prefix = format!("[{}:]", self.names().user);
        let text = self
            .renderer
            .rendered_turns()
            .into_iter()
            .rev()
            .find(|(i, text)| *i < index && text.starts_with(&prefix))
            .and_then(|(_, text)| text.strip_prefix(prefix.as_str()).map(|s| s.trim().to_string()))?;
        tracing::warn!(index = index, "User turn missing from log; recovered from display");
        Some(text)
    }

    /// Remove the given rows plus any display-only rows at or past `threshold`.
    fn remove_rendered_from(&self, threshold: u64, removed: &[u64]) {
        for index in removed {
            self.renderer.remove_turn(*index);
        }
        for (index, _) in self.renderer.rendered_turns() {
            if index >= threshold {
                self.renderer.remove_turn(index);
            }
        }
    }
}
