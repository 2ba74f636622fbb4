pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod ollama;
pub mod pipeline;
pub mod provider;
pub mod retrieval;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use config::Settings;
use database::{Database, VideoMetadata};
use error::AppError;
use ollama::OllamaClient;
use pipeline::{HighlightPipeline, IndexReport};
use retrieval::RetrievalScorer;

/// Shared handles for one process: the store and the model client.
pub struct App {
    pub settings: Settings,
    pub db: Arc<Database>,
    pub ollama: Arc<OllamaClient>,
}

impl App {
    pub fn open(settings: Settings) -> Result<Self, AppError> {
        let db = Database::new(&settings.database_path)?;
        log::info!("Opened highlight store at {:?}", settings.database_path);
        match db.embedding_dim() {
            Ok(Some(dim)) if dim != settings.ollama.embedding_dim => log::warn!(
                "Store holds {}-dimensional embeddings but embedding_dim is {}; new writes will be rejected",
                dim,
                settings.ollama.embedding_dim
            ),
            Ok(_) => {}
            Err(e) => log::warn!("Failed to read index metadata: {}", e),
        }

        let ollama = OllamaClient::new(&settings.ollama)?;
        Ok(Self {
            db: Arc::new(db),
            ollama: Arc::new(ollama),
            settings,
        })
    }

    pub fn pipeline(&self) -> Result<HighlightPipeline, AppError> {
        HighlightPipeline::new(
            &self.settings,
            self.db.clone(),
            self.ollama.clone(),
            self.ollama.clone(),
        )
    }

    pub fn scorer(&self) -> RetrievalScorer {
        RetrievalScorer::new(self.db.clone(), self.ollama.clone(), &self.settings.retrieval)
    }

    /// Log whether Ollama is reachable and has both models; never fails.
    pub async fn check_models(&self) {
        match self.ollama.health_check().await {
            Ok(status) if status.running => {
                if !status.judge_model_available {
                    log::warn!("Judge model {} is not pulled", self.settings.ollama.judge_model);
                }
                if !status.embed_model_available {
                    log::warn!("Embedding model {} is not pulled", self.settings.ollama.embed_model);
                }
            }
            Ok(_) => log::warn!("Ollama is not running at {}", self.settings.ollama.base_url),
            Err(e) => log::warn!("Ollama health check failed: {}", e),
        }
    }

    pub async fn index_transcript(
        &self,
        transcript: &Path,
        video: &VideoMetadata,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, AppError> {
        let spans = pipeline::load_transcript(transcript)?;
        self.pipeline()?.run(video, &spans, cancel).await
    }

    pub async fn serve(&self, shutdown: CancellationToken) -> Result<(), AppError> {
        let state = api::ApiState {
            scorer: Arc::new(self.scorer()),
        };
        api::serve(&self.settings.bind, state, shutdown).await
    }
}
