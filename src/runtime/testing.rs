//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::RenderPort;
use crate::expression::{Expression, ExpressionError, SentimentScorer};
use crate::llm::{ByteStream, ChatRequest, InferenceService, LlmError};
use crate::memory::transcript::prefixed;
use crate::signal::{SignalError, SignalSink};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// Scripted inference service
// ============================================================================

type Chunk = Result<Vec<u8>, LlmError>;

enum Script {
    Chunks(Vec<Chunk>),
    Feed(mpsc::UnboundedReceiver<Chunk>),
    OpenError(LlmError),
}

/// Live stream the test writes into after the request opened.
pub struct StreamFeed {
    tx: mpsc::UnboundedSender<Chunk>,
}

impl StreamFeed {
    pub fn fragment(&self, text: &str) {
        self.raw(&record_line(text));
    }

    pub fn done(&self) {
        self.raw("{\"done\":true}\n");
    }

    pub fn raw(&self, text: &str) {
        let _ = self.tx.send(Ok(text.as_bytes().to_vec()));
    }

    pub fn fail(&self, error: LlmError) {
        let _ = self.tx.send(Err(error));
    }
}

fn record_line(text: &str) -> String {
    let record = serde_json::json!({
        "message": {"role": "assistant", "content": text},
        "done": false
    });
    format!("{record}\n")
}

/// Inference service that plays back queued scripts, one per request
pub struct ScriptedInference {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
    stops: AtomicUsize,
    model_id: String,
}

impl ScriptedInference {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            model_id: "test-model".to_string(),
        }
    }

    /// Queue a complete reply made of `fragments` followed by a done record.
    pub fn queue_reply(&self, fragments: &[&str]) {
        let mut chunks: Vec<Chunk> = fragments
            .iter()
            .map(|f| Ok(record_line(f).into_bytes()))
            .collect();
        chunks.push(Ok(b"{\"done\":true}\n".to_vec()));
        self.push(Script::Chunks(chunks));
    }

    /// Queue raw body chunks.
    pub fn queue_chunks(&self, chunks: Vec<Vec<u8>>) {
        self.push(Script::Chunks(chunks.into_iter().map(Ok).collect()));
    }

    pub fn queue_open_error(&self, error: LlmError) {
        self.push(Script::OpenError(error));
    }

    /// Queue a stream the test controls; it stays open until the feed is dropped.
    pub fn queue_feed(&self) -> StreamFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Script::Feed(rx));
        StreamFeed { tx }
    }

    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub async fn wait_for_requests(&self, count: usize) {
        eventually(|| self.requests.lock().unwrap().len() >= count).await;
    }

    fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }
}

#[async_trait]
impl InferenceService for ScriptedInference {
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Chunks(chunks)) => Ok(Box::pin(futures::stream::iter(chunks))),
            Some(Script::Feed(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Some(Script::OpenError(error)) => Err(error),
            None => Err(LlmError::network("No mock response queued")),
        }
    }

    async fn stop_generation(&self) -> Result<(), LlmError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Recording renderer
// ============================================================================

/// Display surface that remembers what it was told to show
#[derive(Default)]
pub struct RecordingRenderer {
    rows: Mutex<BTreeMap<u64, (String, String)>>,
    expressions: Mutex<Vec<Expression>>,
    clears: AtomicUsize,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self, index: u64) -> Option<String> {
        self.rows
            .lock()
            .unwrap()
            .get(&index)
            .map(|(_, content)| content.clone())
    }

    pub fn indices(&self) -> Vec<u64> {
        self.rows.lock().unwrap().keys().copied().collect()
    }

    pub fn expressions(&self) -> Vec<Expression> {
        self.expressions.lock().unwrap().clone()
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl RenderPort for RecordingRenderer {
    fn render_turn(&self, display_name: &str, text: &str, index: u64) {
        self.rows
            .lock()
            .unwrap()
            .insert(index, (display_name.to_string(), text.to_string()));
    }

    fn update_turn(&self, index: u64, text: &str) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&index) {
            row.1 = text.to_string();
        }
    }

    fn remove_turn(&self, index: u64) {
        self.rows.lock().unwrap().remove(&index);
    }

    fn rendered_turns(&self) -> Vec<(u64, String)> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .map(|(index, (name, content))| (*index, prefixed(name, content)))
            .collect()
    }

    fn clear(&self) {
        self.rows.lock().unwrap().clear();
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn show_expression(&self, expression: Expression) {
        self.expressions.lock().unwrap().push(expression);
    }
}

// ============================================================================
// Signal sink and scorer
// ============================================================================

#[derive(Default)]
pub struct RecordingSignalSink {
    forwarded: Mutex<Vec<String>>,
}

impl RecordingSignalSink {
    pub fn forwarded(&self) -> Vec<String> {
        self.forwarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignalSink for RecordingSignalSink {
    async fn forward(&self, text: &str) -> Result<(), SignalError> {
        self.forwarded.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Scorer that returns the same score for any text
pub struct FixedScorer(pub f64);

#[async_trait]
impl SentimentScorer for FixedScorer {
    async fn compound_score(&self, _text: &str) -> Result<f64, ExpressionError> {
        Ok(self.0)
    }
}
