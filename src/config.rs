//! Runtime settings
//!
//! Every policy value of the pipeline lives here with its default, so the
//! thresholds can be tuned from `config.yaml` without touching logic.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub bind: String,
    pub ollama: OllamaSettings,
    pub segmenter: SegmenterSettings,
    pub prefilter: PrefilterSettings,
    pub assessor: AssessorSettings,
    pub indexer: IndexerSettings,
    pub retrieval: RetrievalSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub base_url: String,
    pub judge_model: String,
    pub embed_model: String,
    /// Width of every vector the embedding model returns.
    pub embedding_dim: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterSettings {
    /// Spans closer than this (seconds) are merged into one segment.
    pub merge_gap_seconds: f64,
    pub max_segment_duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefilterSettings {
    pub min_text_length: usize,
    pub min_segment_duration: f64,
    pub max_filler_ratio: f64,
    pub filler_words: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessorSettings {
    pub quality_threshold: u8,
    pub concurrency: usize,
    pub context_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSettings {
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub similarity_floor: f32,
    pub default_top_k: usize,
    pub max_top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let database_path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("video-highlights")
            .join("highlights.db");
        Self {
            database_path,
            bind: "127.0.0.1:8000".to_string(),
            ollama: OllamaSettings::default(),
            segmenter: SegmenterSettings::default(),
            prefilter: PrefilterSettings::default(),
            assessor: AssessorSettings::default(),
            indexer: IndexerSettings::default(),
            retrieval: RetrievalSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            judge_model: "llama3.2:3b".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            embedding_dim: 768,
        }
    }
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            merge_gap_seconds: 1.0,
            max_segment_duration: 60.0,
        }
    }
}

impl Default for PrefilterSettings {
    fn default() -> Self {
        let filler_words = [
            "um", "uh", "uhm", "er", "ah", "hmm", "like", "so", "yeah", "okay", "ok", "well",
            "basically", "actually", "right",
        ];
        Self {
            min_text_length: 10,
            min_segment_duration: 2.0,
            max_filler_ratio: 0.7,
            filler_words: filler_words.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl Default for AssessorSettings {
    fn default() -> Self {
        Self {
            quality_threshold: 6,
            concurrency: 4,
            context_window: 5,
        }
    }
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self { batch_size: 16 }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            similarity_floor: 0.3,
            default_top_k: 5,
            max_top_k: 20,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            call_timeout_secs: 60,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Settings {
    /// Load settings from an optional YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    AppError::Config(format!("Failed to read config {:?}: {}", path, e))
                })?;
                let parsed: Settings = serde_yaml::from_str(&raw)?;
                log::info!("Loaded settings from {:?}", path);
                parsed
            }
            None => Settings::default(),
        };

        settings.apply_env_overrides(Path::new("."));
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self, project_dir: &Path) {
        if let Some(v) = load_env_value(project_dir, "HIGHLIGHTS_DB_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = load_env_value(project_dir, "HIGHLIGHTS_BIND") {
            self.bind = v;
        }
        if let Some(v) = load_env_value(project_dir, "OLLAMA_BASE_URL") {
            self.ollama.base_url = v;
        }
        if let Some(v) = load_env_value(project_dir, "OLLAMA_JUDGE_MODEL") {
            self.ollama.judge_model = v;
        }
        if let Some(v) = load_env_value(project_dir, "OLLAMA_EMBED_MODEL") {
            self.ollama.embed_model = v;
        }
    }

    /// Reject values that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<(), AppError> {
        if !(1..=10).contains(&self.assessor.quality_threshold) {
            return Err(AppError::Config(format!(
                "quality_threshold must be within 1..=10, got {}",
                self.assessor.quality_threshold
            )));
        }
        if self.assessor.concurrency == 0 {
            return Err(AppError::Config("assessor concurrency must be at least 1".into()));
        }
        if self.indexer.batch_size == 0 {
            return Err(AppError::Config("indexer batch_size must be at least 1".into()));
        }
        if self.ollama.embedding_dim == 0 {
            return Err(AppError::Config("embedding_dim must be at least 1".into()));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.similarity_floor) {
            return Err(AppError::Config(format!(
                "similarity_floor must be within [-1, 1], got {}",
                self.retrieval.similarity_floor
            )));
        }
        if self.retrieval.default_top_k == 0 || self.retrieval.max_top_k == 0 {
            return Err(AppError::Config("top_k values must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry max_attempts must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.prefilter.max_filler_ratio) {
            return Err(AppError::Config(format!(
                "max_filler_ratio must be within [0, 1], got {}",
                self.prefilter.max_filler_ratio
            )));
        }
        Ok(())
    }
}

/// Look a key up in the process environment, falling back to a `.env` file.
pub fn load_env_value(project_dir: &Path, key: &str) -> Option<String> {
    if let Ok(value) = std::env::var(key) {
        if !value.trim().is_empty() {
            return Some(value.trim().to_string());
        }
    }

    let env_path = project_dir.join(".env");
    let prefix = format!("{}=", key);
    if let Ok(content) = std::fs::read_to_string(&env_path) {
        for line in content.lines() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix(&prefix) {
                let value = rest.trim().trim_matches('"').trim_matches('\'');
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}
