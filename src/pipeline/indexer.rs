use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::judgment::Judgment;
use super::retry::RetryPolicy;
use crate::database::{BatchCommit, Database, NewHighlight, VideoMetadata};
use crate::error::AppError;
use crate::provider::EmbeddingProvider;

/// An accepted judgment positioned in its video, not yet embedded.
#[derive(Debug, Clone)]
pub struct HighlightCandidate {
    pub segment_index: usize,
    pub timestamp: f64,
    pub judgment: Judgment,
}

/// A batch that was rolled back; its highlights were not stored.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub batch: usize,
    pub highlights: usize,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct IndexOutcome {
    pub persisted: usize,
    pub skipped_existing: usize,
    pub failures: Vec<BatchFailure>,
    pub cancelled: bool,
}

/// Text that represents a highlight in vector space.
pub fn embedding_text(judgment: &Judgment) -> String {
    format!("{}\n{}", judgment.description, judgment.summary)
}

/// Embeds accepted highlights in batches and commits each batch atomically.
pub struct EmbeddingIndexer {
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl EmbeddingIndexer {
    pub fn new(
        db: Arc<Database>,
        embedder: Arc<dyn EmbeddingProvider>,
        retry: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            db,
            embedder,
            retry,
            batch_size: batch_size.max(1),
        }
    }

    /// Index every candidate. A failed batch is logged and recorded; the
    /// remaining batches still run. Stops between batches once `cancel` fires.
    pub async fn index(
        &self,
        video: &VideoMetadata,
        candidates: &[HighlightCandidate],
        cancel: &CancellationToken,
    ) -> IndexOutcome {
        let mut outcome = IndexOutcome::default();

        for (batch, chunk) in candidates.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                log::warn!(
                    "Indexing of {} cancelled before batch {}",
                    video.filename,
                    batch
                );
                outcome.cancelled = true;
                break;
            }

            match self.index_batch(video, chunk).await {
                Ok(commit) => {
                    log::debug!(
                        "Batch {} of {}: {} stored, {} already present",
                        batch,
                        video.filename,
                        commit.inserted,
                        commit.skipped
                    );
                    outcome.persisted += commit.inserted;
                    outcome.skipped_existing += commit.skipped;
                }
                Err(e) => {
                    log::error!(
                        "Batch {} of {} ({} highlights) rolled back: {}",
                        batch,
                        video.filename,
                        chunk.len(),
                        e
                    );
                    outcome.failures.push(BatchFailure {
                        batch,
                        highlights: chunk.len(),
                        error: e.to_string(),
                    });
                }
            }
        }

        outcome
    }

    async fn index_batch(
        &self,
        video: &VideoMetadata,
        batch: &[HighlightCandidate],
    ) -> Result<BatchCommit, AppError> {
        let texts: Vec<String> = batch.iter().map(|c| embedding_text(&c.judgment)).collect();
        let vectors = self
            .retry
            .run("embed", || self.embedder.embed(&texts))
            .await?;

        if vectors.len() != batch.len() {
            return Err(AppError::External(format!(
                "{} returned {} embeddings for {} inputs",
                self.embedder.name(),
                vectors.len(),
                batch.len()
            )));
        }
        let expected = self.embedder.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let rows: Vec<NewHighlight> = batch
            .iter()
            .zip(vectors)
            .map(|(candidate, embedding)| NewHighlight {
                timestamp: candidate.timestamp,
                description: candidate.judgment.description.clone(),
                summary: candidate.judgment.summary.clone(),
                category: candidate.judgment.category.clone(),
                quality_score: candidate.judgment.importance_score,
                embedding,
            })
            .collect();

        let db = self.db.clone();
        let video = video.clone();
        tokio::task::spawn_blocking(move || db.commit_batch(&video, &rows))
            .await
            .map_err(|e| AppError::Persistence(format!("commit task failed: {}", e)))?
            .map_err(|e| match AppError::from(e) {
                AppError::Database(msg) => AppError::Persistence(msg),
                other => other,
            })
    }
}
