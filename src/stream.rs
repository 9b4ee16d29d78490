//! Stream controller
//!
//! Owns at most one in-flight chat request. Starting a new session cancels
//! the previous one. Fragments are delivered to a callback in wire order.

use crate::llm::ndjson::{Decoded, NdjsonDecoder};
use crate::llm::{ChatRequest, InferenceService, LlmError};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Written as the assistant's reply when the inference service is unreachable.
pub const FALLBACK_MESSAGE: &str = "(Spouse can't be heard...)";

/// Handle for one request: identity, target turn and cancellation.
#[derive(Debug, Clone)]
pub struct StreamSession {
    id: u64,
    target_index: u64,
    cancel: CancellationToken,
}

impl StreamSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct StreamController<L> {
    service: Arc<L>,
    active: Mutex<Option<StreamSession>>,
    next_id: AtomicU64,
}

impl<L: InferenceService + 'static> StreamController<L> {
    pub fn new(service: Arc<L>) -> Self {
        Self {
            service,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn service(&self) -> &L {
        &self.service
    }

    /// Register a new session for `target_index`, superseding any active one.
    pub fn begin(&self, target_index: u64) -> StreamSession {
        let session = StreamSession {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            target_index,
            cancel: CancellationToken::new(),
        };
        let previous = self.lock_active().replace(session.clone());
        if let Some(previous) = previous {
            tracing::warn!(
                session = previous.id,
                target = previous.target_index,
                "Cancelling in-flight response for new request"
            );
            self.abort(&previous);
        }
        session
    }

    /// Start a session and drive it to completion.
    pub async fn send<F>(
        &self,
        target_index: u64,
        request: &ChatRequest,
        on_chunk: F,
    ) -> Result<(), LlmError>
    where
        F: FnMut(&str),
    {
        let session = self.begin(target_index);
        self.drive(&session, request, on_chunk).await
    }

    /// Run `session` until the server signals completion, the body ends,
    /// the transport fails or the session is cancelled.
    ///
    /// On transport failure before any content arrived, `on_chunk` receives
    /// [`FALLBACK_MESSAGE`] once and the error is returned.
    pub async fn drive<F>(
        &self,
        session: &StreamSession,
        request: &ChatRequest,
        mut on_chunk: F,
    ) -> Result<(), LlmError>
    where
        F: FnMut(&str),
    {
        let result = self.pump(session, request, &mut on_chunk).await;
        self.finish(session);
        match &result {
            Ok(()) => tracing::debug!(session = session.id, "Stream completed"),
            Err(e) if e.is_cancelled() => {
                tracing::debug!(session = session.id, "Stream cancelled");
            }
            Err(e) => tracing::warn!(session = session.id, error = %e, "Stream failed"),
        }
        result
    }

    async fn pump<F>(
        &self,
        session: &StreamSession,
        request: &ChatRequest,
        on_chunk: &mut F,
    ) -> Result<(), LlmError>
    where
        F: FnMut(&str),
    {
        let cancel = session.cancel.clone();

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::cancelled("Stream cancelled before open")),
            opened = self.service.open_chat_stream(request) => opened,
        };
        let mut body = match opened {
            Ok(body) => body,
            Err(e) => {
                if cancel.is_cancelled() {
                    return Err(LlmError::cancelled("Stream cancelled before open"));
                }
                on_chunk(FALLBACK_MESSAGE);
                return Err(e);
            }
        };

        let mut decoder = NdjsonDecoder::new();
        let mut delivered = false;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LlmError::cancelled("Stream cancelled")),
                next = body.next() => next,
            };

            let bytes = match next {
                None => break,
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    if delivered {
                        tracing::warn!(session = session.id, error = %e, "Stream broke; keeping partial reply");
                    } else {
                        on_chunk(FALLBACK_MESSAGE);
                    }
                    return Err(e);
                }
            };

            for decoded in decoder.feed(&bytes) {
                if cancel.is_cancelled() {
                    return Err(LlmError::cancelled("Stream cancelled"));
                }
                match decoded {
                    Decoded::Record(record) => {
                        if record.done {
                            return Ok(());
                        }
                        if let Some(fragment) = record.fragment() {
                            on_chunk(fragment);
                            delivered = true;
                        }
                    }
                    Decoded::Malformed { line, error } => {
                        tracing::warn!(session = session.id, line = %line, error = %error, "Skipping malformed stream record");
                    }
                }
            }
        }

        if decoder.pending() > 0 {
            tracing::debug!(
                session = session.id,
                fragment = %decoder.into_remainder(),
                "Discarding unterminated trailing record"
            );
        }
        Ok(())
    }

    /// Clear the active handle if it still belongs to `session`.
    pub fn finish(&self, session: &StreamSession) -> bool {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|a| a.id == session.id) {
            *active = None;
            true
        } else {
            false
        }
    }

    /// Force-stop the active session. Returns its target index.
    pub fn cancel_active(&self) -> Option<u64> {
        let previous = self.lock_active().take()?;
        tracing::info!(session = previous.id, target = previous.target_index, "Stopping response");
        self.abort(&previous);
        Some(previous.target_index)
    }

    /// Cancel the active session only if its target is `>= threshold`.
    pub fn cancel_targeting_from(&self, threshold: u64) -> Option<u64> {
        let previous = {
            let mut active = self.lock_active();
            if !active.as_ref().is_some_and(|a| a.target_index >= threshold) {
                return None;
            }
            active.take()?
        };
        tracing::warn!(
            session = previous.id,
            target = previous.target_index,
            "Cancelling response inside rewound range"
        );
        self.abort(&previous);
        Some(previous.target_index)
    }

    pub fn active_target(&self) -> Option<u64> {
        self.lock_active().as_ref().map(|s| s.target_index)
    }

    fn abort(&self, session: &StreamSession) {
        session.cancel.cancel();
        self.signal_stop();
    }

    /// Fire-and-forget stop request to the server.
    fn signal_stop(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime; skipping stop signal");
            return;
        };
        let service = self.service.clone();
        handle.spawn(async move {
            if let Err(e) = service.stop_generation().await {
                tracing::debug!(error = %e, "Stop signal failed");
            }
        });
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<StreamSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, LlmErrorKind};
    use crate::runtime::testing::{eventually, ScriptedInference};

    fn request() -> ChatRequest {
        ChatRequest::new("test-model", vec![ChatMessage::user("Hello")])
    }

    #[tokio::test]
    async fn test_fragments_delivered_in_order_until_done() {
        let mock = Arc::new(ScriptedInference::new());
        mock.queue_chunks(vec![
            b"{\"message\":{\"content\":\"Hel\"}}\n{\"message\":{\"content\":\"\"}}\n".to_vec(),
            b"{\"message\":{\"content\":\"lo\"}}\nnot json\n".to_vec(),
            b"{\"message\":{\"content\":\"ignored\"},\"done\":true}\n".to_vec(),
            b"{\"message\":{\"content\":\"after done\"}}\n".to_vec(),
        ]);
        let controller = StreamController::new(mock.clone());

        let mut received = Vec::new();
        controller
            .send(1, &request(), |f| received.push(f.to_string()))
            .await
            .unwrap();

        assert_eq!(received, vec!["Hel", "lo"]);
        assert_eq!(controller.active_target(), None);
        assert_eq!(mock.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_delivers_fallback_once() {
        let mock = Arc::new(ScriptedInference::new());
        mock.queue_open_error(LlmError::network("Connection failed"));
        let controller = StreamController::new(mock);

        let mut received = Vec::new();
        let err = controller
            .send(1, &request(), |f| received.push(f.to_string()))
            .await
            .unwrap_err();

        assert_eq!(err.kind, LlmErrorKind::Network);
        assert_eq!(received, vec![FALLBACK_MESSAGE]);
    }

    #[tokio::test]
    async fn test_read_failure_after_content_keeps_partial() {
        let mock = Arc::new(ScriptedInference::new());
        let feed = mock.queue_feed();
        feed.fragment("partial");
        feed.fail(LlmError::network("connection reset"));
        let controller = StreamController::new(mock);

        let mut received = Vec::new();
        let err = controller
            .send(1, &request(), |f| received.push(f.to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::Network);
        assert_eq!(received, vec!["partial"]);
    }

    #[tokio::test]
    async fn test_trailing_fragment_discarded() {
        let mock = Arc::new(ScriptedInference::new());
        mock.queue_chunks(vec![
            b"{\"message\":{\"content\":\"a\"}}\n{\"message\":{\"content\":\"b\"}}".to_vec(),
        ]);
        let controller = StreamController::new(mock);

        let mut received = Vec::new();
        controller
            .send(1, &request(), |f| received.push(f.to_string()))
            .await
            .unwrap();
        assert_eq!(received, vec!["a"]);
    }

    #[tokio::test]
    async fn test_new_session_supersedes_active() {
        let mock = Arc::new(ScriptedInference::new());
        let first_feed = mock.queue_feed();
        mock.queue_reply(&["second"]);
        let controller = Arc::new(StreamController::new(mock.clone()));

        let first = controller.begin(1);
        let driver = {
            let controller = controller.clone();
            let first = first.clone();
            tokio::spawn(async move {
                let mut received = Vec::new();
                let result = controller
                    .drive(&first, &request(), |f| received.push(f.to_string()))
                    .await;
                (result, received)
            })
        };
        first_feed.fragment("one");
        mock.wait_for_requests(1).await;

        let mut second = Vec::new();
        controller
            .send(3, &request(), |f| second.push(f.to_string()))
            .await
            .unwrap();
        first_feed.fragment("late");

        let (result, _) = driver.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert!(first.is_cancelled());
        assert_eq!(second, vec!["second"]);
        eventually(|| mock.stop_count() == 1).await;
        assert_eq!(controller.active_target(), None);
    }

    #[tokio::test]
    async fn test_stale_finish_does_not_clear_newer_session() {
        let mock = Arc::new(ScriptedInference::new());
        let controller = StreamController::new(mock);

        let old = controller.begin(1);
        let new = controller.begin(3);
        assert!(old.is_cancelled());
        assert!(!controller.finish(&old));
        assert_eq!(controller.active_target(), Some(3));
        assert!(controller.finish(&new));
        assert_eq!(controller.active_target(), None);
    }

    #[tokio::test]
    async fn test_cancel_active_and_targeting() {
        let mock = Arc::new(ScriptedInference::new());
        let controller = StreamController::new(mock.clone());

        assert_eq!(controller.cancel_active(), None);

        let session = controller.begin(5);
        assert_eq!(controller.cancel_targeting_from(6), None);
        assert!(!session.is_cancelled());
        assert_eq!(controller.cancel_targeting_from(4), Some(5));
        assert!(session.is_cancelled());

        let session = controller.begin(7);
        assert_eq!(controller.cancel_active(), Some(7));
        assert!(session.is_cancelled());
        eventually(|| mock.stop_count() == 2).await;
    }
}
