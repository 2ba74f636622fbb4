//! Deterministic model fakes shared by unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::AppError;
use crate::provider::{EmbeddingProvider, JudgeProvider, JudgmentRequest};

/// A well-formed judge answer.
pub fn judgment_json(score: u8, description: &str) -> String {
    serde_json::json!({
        "importance_score": score,
        "category": "action",
        "description": description,
        "summary": format!("{} in detail", description),
    })
    .to_string()
}

#[derive(Debug, Clone)]
pub enum FakeReply {
    Json(String),
    Transient,
    Fatal,
}

impl FakeReply {
    fn into_result(self) -> Result<String, AppError> {
        match self {
            FakeReply::Json(raw) => Ok(raw),
            FakeReply::Transient => Err(AppError::TransientExternal("503 from fake judge".into())),
            FakeReply::Fatal => Err(AppError::External("400 from fake judge".into())),
        }
    }
}

/// Judge scripted by substrings of the segment text.
///
/// A script is consumed one reply per call and its last reply repeats.
#[derive(Default)]
pub struct FakeJudge {
    scripts: Vec<(String, Vec<FakeReply>)>,
    delays: Vec<(String, Duration)>,
    default: Option<FakeReply>,
    summary: Option<FakeReply>,
    cursors: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<JudgmentRequest>>,
    completed: Mutex<Vec<String>>,
    summary_prompts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Counts a judge call as outstanding until it returns or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeJudge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, key: &str, reply: FakeReply) -> Self {
        self.replies(key, vec![reply])
    }

    pub fn replies(mut self, key: &str, replies: Vec<FakeReply>) -> Self {
        self.scripts.push((key.to_string(), replies));
        self
    }

    pub fn default_reply(mut self, reply: FakeReply) -> Self {
        self.default = Some(reply);
        self
    }

    pub fn delay(mut self, key: &str, delay: Duration) -> Self {
        self.delays.push((key.to_string(), delay));
        self
    }

    pub fn summary_reply(mut self, reply: FakeReply) -> Self {
        self.summary = Some(reply);
        self
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.segment_text.contains(key))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Context sent with the first call for a matching segment.
    pub fn context_for(&self, key: &str) -> Option<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.segment_text.contains(key))
            .map(|r| r.context.clone())
    }

    /// Segment texts in the order their calls finished.
    pub fn completion_order(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    /// Highest number of judge calls outstanding at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn summary_prompts(&self) -> Vec<String> {
        self.summary_prompts.lock().unwrap().clone()
    }

    fn next_reply(&self, text: &str) -> FakeReply {
        let Some((key, replies)) = self.scripts.iter().find(|(key, _)| text.contains(key.as_str())) else {
            return self
                .default
                .clone()
                .unwrap_or_else(|| FakeReply::Json("no scripted reply".into()));
        };
        let mut cursors = self.cursors.lock().unwrap();
        let cursor = cursors.entry(key.clone()).or_insert(0);
        let reply = replies[(*cursor).min(replies.len() - 1)].clone();
        *cursor += 1;
        reply
    }
}

#[async_trait]
impl JudgeProvider for FakeJudge {
    fn name(&self) -> &str {
        "fake-judge"
    }

    async fn judge(&self, request: &JudgmentRequest) -> Result<String, AppError> {
        self.calls.lock().unwrap().push(request.clone());
        let outstanding = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(outstanding, Ordering::SeqCst);
        let reply = self.next_reply(&request.segment_text);

        let delay = self
            .delays
            .iter()
            .find(|(key, _)| request.segment_text.contains(key.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.completed
            .lock()
            .unwrap()
            .push(request.segment_text.clone());
        reply.into_result()
    }

    async fn summarize(&self, prompt: &str) -> Result<String, AppError> {
        self.summary_prompts.lock().unwrap().push(prompt.to_string());
        self.summary
            .clone()
            .unwrap_or_else(|| FakeReply::Json("A recap of the best moments.".into()))
            .into_result()
    }
}

/// Embedder returning stable vectors derived from the input text.
pub struct FakeEmbedder {
    dimension: usize,
    fixed: HashMap<String, Vec<f32>>,
    transient_failures: AtomicU32,
    fail_on: Option<String>,
    short_on: Option<String>,
    calls: AtomicU32,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixed: HashMap::new(),
            transient_failures: AtomicU32::new(0),
            fail_on: None,
            short_on: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Return `vector` whenever exactly `text` is embedded.
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.fixed.insert(text.to_string(), vector);
        self
    }

    /// Fail the first `n` calls with a transient error.
    pub fn with_transient_failures(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail any call whose inputs contain `key`.
    pub fn failing_on(mut self, key: &str) -> Self {
        self.fail_on = Some(key.to_string());
        self
    }

    /// Return one vector too few for any call whose inputs contain `key`.
    pub fn short_on(mut self, key: &str) -> Self {
        self.short_on = Some(key.to_string());
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.fixed.get(text) {
            return v.clone();
        }
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in text.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (0..self.dimension)
            .map(|i| {
                let mixed = hash.wrapping_add((i as u64).wrapping_mul(0x9e3779b97f4a7c15));
                ((mixed >> 33) % 1000) as f32 / 1000.0 + 0.001
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn name(&self) -> &str {
        "fake-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::TransientExternal("429 from fake embedder".into()));
        }

        let contains = |key: &Option<String>| {
            key.as_ref()
                .is_some_and(|k| texts.iter().any(|t| t.contains(k.as_str())))
        };
        if contains(&self.fail_on) {
            return Err(AppError::External("400 from fake embedder".into()));
        }

        let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.vector_for(t)).collect();
        if contains(&self.short_on) {
            vectors.pop();
        }
        Ok(vectors)
    }
}
