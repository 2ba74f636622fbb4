//! Highlight indexing pipeline
//!
//! transcript spans → segments → pre-filter → judged by the model →
//! embedded in batches → stored, then the video summary is refreshed.

pub mod assessor;
pub mod context;
pub mod indexer;
pub mod judgment;
pub mod merger;
pub mod prefilter;
pub mod retry;
pub mod segmenter;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

pub use assessor::{Assessment, QualityAssessor};
pub use context::AssessmentContext;
pub use indexer::{BatchFailure, EmbeddingIndexer, HighlightCandidate};
pub use judgment::Judgment;
pub use merger::{Outcome, TaggedOutcome};
pub use prefilter::PreFilter;
pub use retry::RetryPolicy;
pub use segmenter::{load_transcript, segment_transcript, Segment, TranscriptSpan};

use crate::config::{SegmenterSettings, Settings};
use crate::database::{Database, Video, VideoMetadata};
use crate::error::AppError;
use crate::provider::{EmbeddingProvider, JudgeProvider};

pub const EMPTY_VIDEO_SUMMARY: &str = "No significant highlights found in the video.";

/// What one indexing run did.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub run_id: Uuid,
    pub video_id: i64,
    pub filename: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub spans: usize,
    pub invalid_spans: usize,
    pub segments: usize,
    pub filtered: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub dropped: usize,
    pub out_of_bounds: usize,
    pub persisted: usize,
    pub skipped_existing: usize,
    pub failed_batches: Vec<BatchFailure>,
    pub summary_updated: bool,
    pub cancelled: bool,
}

pub struct HighlightPipeline {
    db: Arc<Database>,
    judge: Arc<dyn JudgeProvider>,
    segmenter: SegmenterSettings,
    prefilter: PreFilter,
    assessor: QualityAssessor,
    indexer: EmbeddingIndexer,
    retry: RetryPolicy,
    context_window: usize,
}

impl HighlightPipeline {
    pub fn new(
        settings: &Settings,
        db: Arc<Database>,
        judge: Arc<dyn JudgeProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, AppError> {
        let retry = RetryPolicy::from(&settings.retry);
        Ok(Self {
            prefilter: PreFilter::new(&settings.prefilter)?,
            assessor: QualityAssessor::new(judge.clone(), retry.clone(), &settings.assessor),
            indexer: EmbeddingIndexer::new(
                db.clone(),
                embedder,
                retry.clone(),
                settings.indexer.batch_size,
            ),
            segmenter: settings.segmenter.clone(),
            context_window: settings.assessor.context_window,
            retry,
            judge,
            db,
        })
    }

    /// Index one video's transcript.
    ///
    /// Per-segment and per-batch failures are recorded in the report; only an
    /// unusable store or invalid video metadata fails the run.
    pub async fn run(
        &self,
        video: &VideoMetadata,
        spans: &[TranscriptSpan],
        cancel: &CancellationToken,
    ) -> Result<IndexReport, AppError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("index_video", %run_id, filename = %video.filename);
        self.run_inner(run_id, video, spans, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        video: &VideoMetadata,
        spans: &[TranscriptSpan],
        cancel: &CancellationToken,
    ) -> Result<IndexReport, AppError> {
        let started_at = Utc::now();
        validate_video(video)?;

        let stored = self.db.upsert_video(video)?;
        let meta = VideoMetadata::from(&stored);
        log::info!(
            "Indexing {} (video {}, {} transcript spans)",
            stored.filename,
            stored.id,
            spans.len()
        );

        let segmentation = segment_transcript(stored.id, spans, &self.segmenter);
        let segment_count = segmentation.segments.len();
        let (kept, filtered) = self.prefilter.apply(segmentation.segments);
        log::info!(
            "{} segments, {} rejected by pre-filter, {} sent to judge",
            segment_count,
            filtered,
            kept.len()
        );

        let mut report = IndexReport {
            run_id,
            video_id: stored.id,
            filename: stored.filename.clone(),
            started_at,
            finished_at: started_at,
            spans: spans.len(),
            invalid_spans: segmentation.invalid_spans,
            segments: segment_count,
            filtered,
            accepted: 0,
            rejected: 0,
            dropped: 0,
            out_of_bounds: 0,
            persisted: 0,
            skipped_existing: 0,
            failed_batches: Vec::new(),
            summary_updated: false,
            cancelled: false,
        };

        if cancel.is_cancelled() {
            log::warn!("Run {} cancelled before assessment", run_id);
            report.cancelled = true;
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let assessment = self
            .assessor
            .assess_all(&kept, AssessmentContext::new(self.context_window), cancel)
            .await;
        let assessment_cancelled = assessment.cancelled;
        let candidates = self.collect_candidates(&stored, &kept, assessment, &mut report);

        if assessment_cancelled {
            log::warn!(
                "Run {} cancelled during assessment; {} judged highlights not stored",
                run_id,
                candidates.len()
            );
            report.cancelled = true;
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let outcome = self.indexer.index(&meta, &candidates, cancel).await;
        report.persisted = outcome.persisted;
        report.skipped_existing = outcome.skipped_existing;
        report.failed_batches = outcome.failures;
        report.cancelled = outcome.cancelled;

        if !report.cancelled {
            report.summary_updated = self.refresh_summary(&stored).await?;
        }

        report.finished_at = Utc::now();
        log::info!(
            "Indexed {}: {} accepted, {} rejected, {} dropped, {} stored, {} failed batches",
            report.filename,
            report.accepted,
            report.rejected,
            report.dropped,
            report.persisted,
            report.failed_batches.len()
        );
        Ok(report)
    }

    /// Turn accepted outcomes into positioned candidates, counting the rest.
    fn collect_candidates(
        &self,
        video: &Video,
        segments: &[Segment],
        assessment: Assessment,
        report: &mut IndexReport,
    ) -> Vec<HighlightCandidate> {
        let by_index: HashMap<usize, &Segment> = segments.iter().map(|s| (s.index, s)).collect();
        let mut candidates = Vec::new();

        for tagged in assessment.outcomes {
            match tagged.outcome {
                Outcome::Accepted(judgment) => {
                    report.accepted += 1;
                    let Some(segment) = by_index.get(&tagged.segment_index) else {
                        continue;
                    };
                    let timestamp = segment.midpoint();
                    if !(0.0..=video.duration).contains(&timestamp) {
                        let err = AppError::Validation(format!(
                            "highlight at {:.2}s outside video duration {:.2}s",
                            timestamp, video.duration
                        ));
                        log::warn!("Dropping segment {}: {}", segment.index, err);
                        report.out_of_bounds += 1;
                        continue;
                    }
                    candidates.push(HighlightCandidate {
                        segment_index: segment.index,
                        timestamp,
                        judgment,
                    });
                }
                Outcome::Rejected { .. } => report.rejected += 1,
                Outcome::Dropped { .. } => report.dropped += 1,
            }
        }

        candidates
    }

    /// Regenerate the video summary from its stored highlights.
    ///
    /// Returns whether the summary was written. A failed model call is logged
    /// and leaves the previous summary; a storage failure is an error.
    async fn refresh_summary(&self, video: &Video) -> Result<bool, AppError> {
        let highlights = self.db.get_video_highlights(video.id)?;
        let summary = if highlights.is_empty() {
            EMPTY_VIDEO_SUMMARY.to_string()
        } else {
            let prompt = summary_prompt(&highlights);
            match self
                .retry
                .run("summarize", || self.judge.summarize(&prompt))
                .await
            {
                Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
                Ok(_) => {
                    log::warn!("Empty summary returned for {}", video.filename);
                    return Ok(false);
                }
                Err(e) => {
                    log::warn!("Failed to summarize {}: {}", video.filename, e);
                    return Ok(false);
                }
            }
        };

        self.db.update_video_summary(video.id, &summary)?;
        Ok(true)
    }
}

fn validate_video(video: &VideoMetadata) -> Result<(), AppError> {
    if video.filename.trim().is_empty() {
        return Err(AppError::Validation("video filename is empty".into()));
    }
    if !video.duration.is_finite() || video.duration < 0.0 {
        return Err(AppError::Validation(format!(
            "video duration must be a non-negative number, got {}",
            video.duration
        )));
    }
    Ok(())
}

fn summary_prompt(highlights: &[crate::database::Highlight]) -> String {
    let lines: Vec<String> = highlights
        .iter()
        .map(|h| format!("- At {:.1}s: {}", h.timestamp, h.description))
        .collect();
    format!(
        "Write a concise summary of the video from these highlights:\n\n{}\n\nSummary:",
        lines.join("\n")
    )
}
