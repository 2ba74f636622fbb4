//! Ollama integration
//!
//! Calls the Ollama REST API both to judge transcript segments and to embed
//! highlight text. Implements the two capability ports from `provider`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::OllamaSettings;
use crate::error::AppError;
use crate::provider::{EmbeddingProvider, JudgeProvider, JudgmentRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const JUDGE_SYSTEM_PROMPT: &str = "You are a video editor selecting highlight moments from a transcript. \
Rate how important the given transcript segment is for someone skimming the video. \
Respond with a single JSON object with exactly these fields: \
\"importance_score\" (integer 1-10), \"category\" (short lowercase label such as \
\"action\", \"dialogue\", \"insight\", \"humor\"), \"description\" (one sentence describing the moment), \
\"summary\" (one or two sentences summarizing what is said).";

const SUMMARY_SYSTEM_PROMPT: &str =
    "You summarize videos. Answer with a concise plain-text summary of at most five sentences.";

/// Ollama client for making API calls
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    judge_model: String,
    embed_model: String,
    embedding_dim: usize,
}

impl OllamaClient {
    pub fn new(settings: &OllamaSettings) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            judge_model: settings.judge_model.clone(),
            embed_model: settings.embed_model.clone(),
            embedding_dim: settings.embedding_dim,
        })
    }

    /// Check if Ollama is running and both models are available
    pub async fn health_check(&self) -> Result<OllamaStatus, AppError> {
        let tags_url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&tags_url)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !response.status().is_success() {
            return Err(classify_status(response.status(), "tags request failed".into()));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| AppError::External(format!("Failed to parse Ollama response: {}", e)))?;

        let has_model = |model: &str| {
            let family = model.split(':').next().unwrap_or(model);
            tags.models.iter().any(|m| m.name.starts_with(family))
        };

        Ok(OllamaStatus {
            running: true,
            judge_model_available: has_model(&self.judge_model),
            embed_model_available: has_model(&self.embed_model),
            available_models: tags.models.iter().map(|m| m.name.clone()).collect(),
        })
    }

    /// Generate a completion from Ollama
    async fn generate(
        &self,
        prompt: &str,
        system: &str,
        format: Option<&str>,
    ) -> Result<String, AppError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: self.judge_model.clone(),
            prompt: prompt.to_string(),
            system: Some(system.to_string()),
            stream: false,
            format: format.map(|f| f.to_string()),
            options: Some(GenerateOptions {
                temperature: 0.0,
                num_predict: 512,
            }),
        };

        log::debug!(
            "Sending request to Ollama: model={}, prompt_len={}",
            self.judge_model,
            prompt.len()
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::TransientExternal(format!("Failed to read Ollama response: {}", e)))?;

        log::debug!(
            "Ollama response received: {} chars, eval_duration={:?}ms",
            result.response.len(),
            result.eval_duration.map(|d| d / 1_000_000)
        );

        Ok(result.response)
    }
}

#[async_trait]
impl JudgeProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn judge(&self, request: &JudgmentRequest) -> Result<String, AppError> {
        let prompt = build_judge_prompt(request);
        self.generate(&prompt, JUDGE_SYSTEM_PROMPT, Some("json")).await
    }

    async fn summarize(&self, prompt: &str) -> Result<String, AppError> {
        self.generate(prompt, SUMMARY_SYSTEM_PROMPT, None).await
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn dimension(&self) -> usize {
        self.embedding_dim
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: &self.embed_model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AppError::TransientExternal(format!("Failed to read embedding response: {}", e)))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(AppError::External(format!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

fn build_judge_prompt(request: &JudgmentRequest) -> String {
    let context = if request.context.is_empty() {
        "(none yet)".to_string()
    } else {
        request
            .context
            .iter()
            .map(|d| format!("- {}", d))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Recent highlights, oldest first:\n{}\n\n---\nSEGMENT ({:.1}s - {:.1}s):\n{}\n---\n\nRespond in JSON format only.",
        context, request.start_time, request.end_time, request.segment_text
    )
}

fn classify_transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        AppError::TransientExternal(format!("Failed to call Ollama: {}", e))
    } else {
        AppError::External(format!("Failed to call Ollama: {}", e))
    }
}

fn classify_status(status: StatusCode, body: String) -> AppError {
    let message = format!("Ollama returned {}: {}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AppError::TransientExternal(message)
    } else {
        AppError::External(message)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_duration: Option<u64>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

// ============================================================================
// Public Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaStatus {
    pub running: bool,
    pub judge_model_available: bool,
    pub embed_model_available: bool,
    pub available_models: Vec<String>,
}
