//! Turn orchestration
//!
//! Ties the conversation log, the stream controller and the display together.
//! All log and display mutations happen under one lock; the stream callback
//! takes the same lock, so a cancelled session can never write after the
//! operation that cancelled it.

mod edit;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use traits::RenderPort;

use crate::config::ChatSettings;
use crate::expression::ExpressionClassifier;
use crate::llm::{ChatRequest, InferenceService};
use crate::memory::transcript::SpeakerNames;
use crate::memory::{ConversationLog, MemoryError, Turn};
use crate::persistence::PersistenceMirror;
use crate::prompt::{build_messages, time_context, PersonaContext};
use crate::signal::{self, SignalSink};
use crate::state_machine::{transition, Effect, Event, OrchestratorState, StreamOutcome};
use crate::stream::StreamController;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("No user message found before turn {0}")]
    NoUserTurn(u64),
    #[error("Transcript error: {0}")]
    Transcript(#[from] std::io::Error),
    #[error("Message is empty")]
    EmptyMessage,
}

pub type ChatResult<T> = Result<T, ChatError>;

/// What a finished (or abandoned) turn produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub user_index: u64,
    pub assistant_index: u64,
    /// Text delivered to the turn by this session
    pub content: String,
    pub outcome: StreamOutcome,
}

struct Core {
    log: ConversationLog,
    state: OrchestratorState,
}

/// Post-lock work requested by the finishing transition
#[derive(Default)]
struct Followups {
    forward: bool,
    classify: bool,
    error: Option<MemoryError>,
}

pub struct TurnOrchestrator<L, R> {
    core: Mutex<Core>,
    controller: StreamController<L>,
    renderer: R,
    persona: PersonaContext,
    user_name: String,
    trim_limit: usize,
    signals: Vec<Arc<dyn SignalSink>>,
    classifier: Option<ExpressionClassifier>,
}

impl<L: InferenceService + 'static, R: RenderPort> TurnOrchestrator<L, R> {
    pub fn new(
        service: Arc<L>,
        renderer: R,
        mirror: Arc<PersistenceMirror>,
        settings: &ChatSettings,
    ) -> Self {
        Self {
            core: Mutex::new(Core {
                log: ConversationLog::new(mirror),
                state: OrchestratorState::Idle,
            }),
            controller: StreamController::new(service),
            renderer,
            persona: settings.persona(),
            user_name: settings.user_name.clone(),
            trim_limit: settings.trim_limit,
            signals: Vec::new(),
            classifier: None,
        }
    }

    pub fn with_signal_sink(mut self, sink: Arc<dyn SignalSink>) -> Self {
        self.signals.push(sink);
        self
    }

    pub fn with_classifier(mut self, classifier: ExpressionClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn names(&self) -> SpeakerNames {
        SpeakerNames::new(self.user_name.clone(), self.persona.ai_name.clone())
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.lock().log.turns().to_vec()
    }

    pub fn state(&self) -> OrchestratorState {
        self.lock().state.clone()
    }

    /// Target turn of the in-flight response, if any.
    pub fn active_target(&self) -> Option<u64> {
        self.controller.active_target()
    }

    /// Replace the log with hydrated turns and redraw the display.
    pub fn restore(&self, turns: Vec<Turn>) {
        let mut core = self.lock();
        let mirror = core.log.mirror();
        core.log = ConversationLog::hydrated(turns, mirror);
        core.state = OrchestratorState::Idle;
        self.render_all(core.log.turns());
        tracing::info!(turns = core.log.len(), next_index = core.log.next_index(), "Conversation restored");
    }

    /// Send a user message and stream the reply into a new assistant turn.
    pub async fn submit(&self, text: &str) -> ChatResult<TurnOutcome> {
        self.run_turn(text, true).await
    }

    async fn run_turn(&self, text: &str, allow_partial_save: bool) -> ChatResult<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let (user_index, target, session, request) = {
            let mut core = self.lock();
            let (user_index, target) = core.log.append_exchange(text)?;
            let session = self.controller.begin(target);

            let result = transition(
                &core.state,
                Event::Submit {
                    session_id: session.id(),
                    target_index: target,
                    allow_partial_save,
                },
            );
            core.state = result.new_state;
            for effect in result.effects {
                if let Effect::AbandonSession {
                    session_id,
                    target_index,
                    allow_partial_save: kept_partial,
                } = effect
                {
                    core.log.finish_construction(target_index);
                    if !kept_partial {
                        let stored = core
                            .log
                            .get(target_index)
                            .map(|t| t.content.clone())
                            .unwrap_or_default();
                        self.renderer.update_turn(target_index, &stored);
                    }
                    tracing::debug!(session = session_id, target = target_index, "Session superseded");
                }
            }
            core.log.begin_construction(target);

            let names = self.names();
            self.renderer.render_turn(&names.user, text, user_index);
            self.renderer.render_turn(&names.assistant, "", target);

            let time = time_context(&chrono::Local::now());
            let request = ChatRequest::new(
                self.controller.service().model_id(),
                build_messages(&self.persona, core.log.turns(), text, &time),
            );
            (user_index, target, session, request)
        };

        tracing::info!(session = session.id(), user = user_index, target = target, "Sending message");

        let mut content = String::new();
        let mut chunk_error: Option<MemoryError> = None;
        let result = self
            .controller
            .drive(&session, &request, |fragment| {
                let mut core = self.lock();
                if session.is_cancelled() {
                    return;
                }
                content.push_str(fragment);
                if allow_partial_save {
                    if let Err(e) = core.log.update_content(target, &content) {
                        tracing::warn!(target = target, error = %e, "Failed to save partial reply");
                        chunk_error.get_or_insert(e);
                    }
                }
                self.renderer.update_turn(target, &content);
            })
            .await;

        let outcome = match result {
            Ok(()) => StreamOutcome::Completed,
            Err(e) if e.is_cancelled() => StreamOutcome::Cancelled,
            Err(e) => StreamOutcome::Failed {
                message: e.to_string(),
            },
        };

        let mut followups = {
            let mut core = self.lock();
            let result = transition(
                &core.state,
                Event::StreamFinished {
                    session_id: session.id(),
                    outcome: outcome.clone(),
                },
            );
            core.state = result.new_state;
            self.apply_effects(&mut core, result.effects, &content)
        };

        if followups.forward {
            signal::forward_all(&self.signals, &content);
        }
        if followups.classify {
            self.classify(&content).await;
        }

        {
            let mut core = self.lock();
            let result = transition(&core.state, Event::Settle { session_id: session.id() });
            core.state = result.new_state;
        }

        if let Some(e) = followups.error.take().or(chunk_error) {
            return Err(e.into());
        }
        Ok(TurnOutcome {
            user_index,
            assistant_index: target,
            content,
            outcome,
        })
    }

    fn apply_effects(&self, core: &mut Core, effects: Vec<Effect>, content: &str) -> Followups {
        let mut followups = Followups::default();
        for effect in effects {
            match effect {
                Effect::AbandonSession { target_index, .. }
                | Effect::FinishConstruction { target_index } => {
                    core.log.finish_construction(target_index);
                }
                Effect::WriteFinal { target_index } => {
                    if let Err(e) = core.log.update_content(target_index, content) {
                        tracing::warn!(target = target_index, error = %e, "Failed to save reply");
                        followups.error.get_or_insert(e);
                    }
                    self.renderer.update_turn(target_index, content);
                }
                Effect::RenderFromLog { target_index } => {
                    let stored = core
                        .log
                        .get(target_index)
                        .map(|t| t.content.clone())
                        .unwrap_or_default();
                    self.renderer.update_turn(target_index, &stored);
                }
                Effect::Trim => {
                    if let Err(e) = core.log.trim(self.trim_limit) {
                        tracing::warn!(error = %e, "Failed to trim conversation log");
                        followups.error.get_or_insert(e);
                    }
                }
                Effect::ForwardSignal { .. } => followups.forward = true,
                Effect::ClassifyExpression { .. } => followups.classify = true,
            }
        }
        followups
    }

    async fn classify(&self, content: &str) {
        let Some(classifier) = &self.classifier else {
            return;
        };
        match classifier.classify(content).await {
            Ok(expression) => self.renderer.show_expression(expression),
            Err(e) => tracing::warn!(error = %e, "Expression classification failed"),
        }
    }

    fn render_all(&self, turns: &[Turn]) {
        let names = self.names();
        for turn in turns {
            self.renderer
                .render_turn(names.for_role(turn.role), &turn.content, turn.index);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
