use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::config::Settings;
use crate::schemas::answer_key::{AnswerKey, AnswerKeyEntry};
use crate::schemas::grading::{ProcessingMode, Submission};
use crate::services::model_client::{
    ModelClient, ModelRequest, ModelTask, ModelTransport, TransportError,
};
use crate::services::retry::{Jitter, RetryPolicy, Sleeper};

pub(crate) const FORCE_RUBRIC: &str = "partial credit for key concepts";

/// Serializes tests that touch process environment variables.
pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn force_answer_key() -> AnswerKey {
    let mut key = AnswerKey::empty();
    key.insert(
        "Q1",
        AnswerKeyEntry {
            reference_answer: String::from("Force is a push or pull."),
            max_points: 5.0,
            must_include: vec![String::from("push"), String::from("pull")],
            extra: Map::new(),
        },
    );
    key
}

pub(crate) fn submission(id: &str, raw_text: &str, mode: ProcessingMode) -> Submission {
    Submission {
        id: id.to_string(),
        raw_text: raw_text.to_string(),
        mode,
        source_sha256: crate::services::inputs::sha256_hex(raw_text.as_bytes()),
    }
}

pub(crate) fn extraction_reply(items: &[(&str, &str)]) -> String {
    let items: Vec<Value> = items
        .iter()
        .map(|(question_id, answer)| {
            json!({
                "question_id": question_id,
                "question_text": "",
                "student_answer": answer,
                "transcription_notes": []
            })
        })
        .collect();
    json!({ "items": items }).to_string()
}

pub(crate) fn grade_item(
    question_id: &str,
    points: f64,
    max_points: f64,
    verdict: &str,
    confidence: f64,
) -> Value {
    json!({
        "question_id": question_id,
        "awarded_points": points,
        "max_points": max_points,
        "verdict": verdict,
        "confidence": confidence,
        "feedback": format!("{verdict} answer")
    })
}

pub(crate) fn grading_reply(items: Vec<Value>) -> String {
    json!({ "items": items }).to_string()
}

pub(crate) fn single_shot_reply(items: Vec<(Value, &str)>) -> String {
    let questions: Vec<Value> = items
        .into_iter()
        .map(|(mut item, answer)| {
            if let Value::Object(object) = &mut item {
                object.insert(String::from("student_answer"), Value::String(answer.to_string()));
            }
            item
        })
        .collect();
    json!({ "questions": questions }).to_string()
}

type Reply = Result<String, TransportError>;

/// Transport that replays scripted replies per (submission, task) and records every request.
#[derive(Default)]
pub(crate) struct FakeTransport {
    scripts: StdMutex<HashMap<(String, ModelTask), VecDeque<Reply>>>,
    latency: HashMap<String, Duration>,
    requests: StdMutex<Vec<ModelRequest>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(self, submission_id: &str, task: ModelTask, replies: Vec<Reply>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry((submission_id.to_string(), task)).or_default().extend(replies);
        }
        self
    }

    /// Delays every reply for one submission, to shuffle completion order.
    pub(crate) fn with_latency(mut self, submission_id: &str, latency: Duration) -> Self {
        self.latency.insert(submission_id.to_string(), latency);
        self
    }

    pub(crate) fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn calls_for(&self, submission_id: &str) -> usize {
        self.requests().iter().filter(|request| request.submission_id == submission_id).count()
    }
}

#[async_trait]
impl ModelTransport for FakeTransport {
    async fn complete(&self, request: &ModelRequest) -> Result<String, TransportError> {
        self.requests.lock().expect("requests lock").push(request.clone());

        if let Some(latency) = self.latency.get(&request.submission_id) {
            tokio::time::sleep(*latency).await;
        }

        let reply = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get_mut(&(request.submission_id.clone(), request.task))
            .and_then(VecDeque::pop_front);

        reply.unwrap_or_else(|| {
            Err(TransportError::Fatal(format!(
                "no scripted reply for {} {}",
                request.submission_id,
                request.task.as_str()
            )))
        })
    }
}

/// Records requested backoff delays and returns immediately.
#[derive(Debug, Default)]
pub(crate) struct RecordingSleeper {
    delays: StdMutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn delays(&self) -> Vec<Duration> {
        self.delays.lock().expect("delays lock").clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().expect("delays lock").push(duration);
        tokio::task::yield_now().await;
    }
}

pub(crate) fn fake_client(transport: Arc<FakeTransport>, max_attempts: u32) -> ModelClient {
    ModelClient::new(
        transport,
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(10),
            Duration::from_millis(100),
            Jitter::Equal,
        ),
        Arc::new(RecordingSleeper::default()),
    )
}

pub(crate) fn test_settings() -> Settings {
    Settings::for_tests()
}

#[derive(Clone, Default)]
struct MockState {
    replies: Arc<StdMutex<VecDeque<(StatusCode, Value)>>>,
    received: Arc<StdMutex<Vec<(HeaderMap, Value)>>>,
}

/// A local chat-completions endpoint answering with scripted status codes and bodies.
pub(crate) struct MockUpstream {
    pub(crate) base_url: String,
    state: MockState,
}

impl MockUpstream {
    pub(crate) async fn start(replies: Vec<(StatusCode, Value)>) -> Self {
        let state = MockState {
            replies: Arc::new(StdMutex::new(replies.into())),
            received: Arc::default(),
        };
        let app = Router::new()
            .route("/chat/completions", post(mock_completion))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let address = listener.local_addr().expect("mock address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { base_url: format!("http://{address}"), state }
    }

    pub(crate) fn received(&self) -> Vec<(HeaderMap, Value)> {
        self.state.received.lock().expect("received lock").clone()
    }
}

async fn mock_completion(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.received.lock().expect("received lock").push((headers, body));
    let reply = state.replies.lock().expect("replies lock").pop_front();
    let (status, body) = reply.unwrap_or((StatusCode::GONE, json!({"error": "script exhausted"})));
    (status, Json(body))
}

pub(crate) fn completion_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
        "usage": {"total_tokens": 42}
    })
}
