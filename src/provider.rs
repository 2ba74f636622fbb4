//! Capability ports
//!
//! The pipeline only talks to generative and embedding models through these
//! traits, so tests can swap in deterministic fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// What the judge is asked about one candidate segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgmentRequest {
    pub segment_text: String,
    pub start_time: f64,
    pub end_time: f64,
    /// Descriptions of the most recent accepted highlights, oldest first.
    pub context: Vec<String>,
}

/// Generative model that scores segments and writes summaries.
#[async_trait]
pub trait JudgeProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the model's raw answer; validation happens in `Judgment::parse`.
    async fn judge(&self, request: &JudgmentRequest) -> Result<String, AppError>;

    /// Free-text completion used for the per-video summary.
    async fn summarize(&self, prompt: &str) -> Result<String, AppError>;
}

/// Model that maps text to fixed-width vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Width of every vector returned by `embed`.
    fn dimension(&self) -> usize;

    /// Embeds every input, returning vectors in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;
}
