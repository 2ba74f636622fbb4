//! Ranks stored highlights against free-text questions.

use std::sync::Arc;

use crate::config::RetrievalSettings;
use crate::database::{Database, Highlight, ScoredHighlight, Video};
use crate::error::AppError;
use crate::provider::EmbeddingProvider;

pub struct RetrievalScorer {
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingProvider>,
    similarity_floor: f32,
    default_top_k: usize,
    max_top_k: usize,
}

impl RetrievalScorer {
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: &RetrievalSettings,
    ) -> Self {
        Self {
            db,
            embedder,
            similarity_floor: settings.similarity_floor,
            default_top_k: settings.default_top_k,
            max_top_k: settings.max_top_k.max(1),
        }
    }

    /// Run a store read on the blocking pool so scans never stall the runtime.
    async fn read<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| AppError::Other(format!("store read task failed: {}", e)))?
            .map_err(AppError::from)
    }

    fn clamp_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_top_k)
            .clamp(1, self.max_top_k)
    }

    /// Highlights most similar to `text`, best first, at or above the floor.
    pub async fn search(
        &self,
        text: &str,
        video_id: Option<i64>,
        top_k: Option<usize>,
    ) -> Result<Vec<ScoredHighlight>, AppError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("question text is empty".into()));
        }
        let limit = self.clamp_top_k(top_k);

        let mut vectors = self.embedder.embed(&[text.to_string()]).await?;
        let query = match vectors.pop() {
            Some(v) if vectors.is_empty() => v,
            _ => {
                return Err(AppError::External(format!(
                    "{} did not return exactly one query embedding",
                    self.embedder.name()
                )))
            }
        };

        match self.read(|db| db.embedding_dim()).await? {
            Some(expected) if expected != query.len() => {
                return Err(AppError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
            Some(_) => {}
            // Nothing indexed yet
            None => return Ok(Vec::new()),
        }

        let floor = self.similarity_floor;
        let results = self
            .read(move |db| db.search_similar(&query, video_id, None, Some(floor), limit))
            .await?;
        log::debug!(
            "Question {:?} matched {} highlights (video {:?}, top_k {})",
            text,
            results.len(),
            video_id,
            limit
        );
        Ok(results)
    }

    /// Highlights closest to an existing one, excluding itself. No floor applies.
    pub async fn similar_to(
        &self,
        highlight_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredHighlight>, AppError> {
        let highlight = self
            .read(move |db| db.get_highlight(highlight_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("highlight {}", highlight_id)))?;
        let limit = self.clamp_top_k(limit);
        self.read(move |db| {
            db.search_similar(&highlight.embedding, None, Some(highlight.id), None, limit)
        })
        .await
    }

    pub async fn videos(&self) -> Result<Vec<Video>, AppError> {
        self.read(|db| db.get_videos()).await
    }

    /// A video's highlights in timestamp order.
    pub async fn video_highlights(&self, video_id: i64) -> Result<Vec<Highlight>, AppError> {
        if self.read(move |db| db.get_video(video_id)).await?.is_none() {
            return Err(AppError::NotFound(format!("video {}", video_id)));
        }
        self.read(move |db| db.get_video_highlights(video_id)).await
    }
}
