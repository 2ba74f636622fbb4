//! Concurrent quality assessment of candidate segments.

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::context::AssessmentContext;
use super::judgment::Judgment;
use super::merger::{fold_into_context, Outcome, ResultMerger, TaggedOutcome};
use super::retry::RetryPolicy;
use super::segmenter::Segment;
use crate::config::AssessorSettings;
use crate::provider::{JudgeProvider, JudgmentRequest};

/// Result of assessing every segment of a video.
#[derive(Debug)]
pub struct Assessment {
    /// One outcome per judged segment, in chronological order.
    pub outcomes: Vec<TaggedOutcome>,
    pub context: AssessmentContext,
    /// Cancellation stopped the run before every segment was judged.
    pub cancelled: bool,
}

pub struct QualityAssessor {
    judge: Arc<dyn JudgeProvider>,
    retry: RetryPolicy,
    quality_threshold: u8,
    concurrency: usize,
}

impl QualityAssessor {
    pub fn new(judge: Arc<dyn JudgeProvider>, retry: RetryPolicy, settings: &AssessorSettings) -> Self {
        Self {
            judge,
            retry,
            quality_threshold: settings.quality_threshold,
            concurrency: settings.concurrency.max(1),
        }
    }

    /// Judge one segment against a context snapshot.
    ///
    /// Transient failures are retried by the retry policy; a response that
    /// fails the schema gets exactly one more attempt. Never returns an
    /// error: failures become `Outcome::Dropped`.
    pub async fn assess_segment(&self, segment: &Segment, context: Vec<String>) -> TaggedOutcome {
        let request = JudgmentRequest {
            segment_text: segment.text.clone(),
            start_time: segment.start_time,
            end_time: segment.end_time,
            context,
        };

        let mut schema_failures = 0u32;
        let outcome = loop {
            let raw = match self.retry.run("judge", || self.judge.judge(&request)).await {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!(
                        "Dropping segment {} ({:.1}s): judge call failed: {}",
                        segment.index,
                        segment.start_time,
                        e
                    );
                    break Outcome::Dropped {
                        reason: e.to_string(),
                    };
                }
            };

            match Judgment::parse(&raw) {
                Ok(judgment) if judgment.is_accepted(self.quality_threshold) => {
                    log::debug!(
                        "Segment {} accepted with score {}",
                        segment.index,
                        judgment.importance_score
                    );
                    break Outcome::Accepted(judgment);
                }
                Ok(judgment) => {
                    break Outcome::Rejected {
                        score: judgment.importance_score,
                    }
                }
                Err(e) => {
                    schema_failures += 1;
                    if schema_failures > 1 {
                        log::warn!(
                            "Dropping segment {} ({:.1}s): {}",
                            segment.index,
                            segment.start_time,
                            e
                        );
                        break Outcome::Dropped {
                            reason: e.to_string(),
                        };
                    }
                    log::debug!("Segment {}: {}; asking again", segment.index, e);
                }
            }
        };

        TaggedOutcome {
            segment_index: segment.index,
            start_time: segment.start_time,
            outcome,
        }
    }

    /// Assess all segments on a bounded pool and fold accepted results into
    /// `context` in chronological order. The context is handed back.
    ///
    /// Once `cancel` fires no further segment is submitted and calls still in
    /// flight are abandoned; only results that already arrived are returned.
    pub async fn assess_all(
        &self,
        segments: &[Segment],
        context: AssessmentContext,
        cancel: &CancellationToken,
    ) -> Assessment {
        let mut shared = RwLock::new(context);
        let mut merger = ResultMerger::new(segments.iter().map(|s| (s.index, s.start_time)));
        let mut outcomes = Vec::with_capacity(segments.len());
        let mut received = 0usize;

        {
            let shared = &shared;
            let in_flight = stream::iter(segments)
                .map(move |segment| async move {
                    let snapshot = shared.read().await.snapshot();
                    self.assess_segment(segment, snapshot).await
                })
                .buffer_unordered(self.concurrency)
                .take_until(cancel.cancelled());
            tokio::pin!(in_flight);

            while let Some(tagged) = in_flight.next().await {
                received += 1;
                let released = merger.push(tagged);
                if !released.is_empty() {
                    let mut ctx = shared.write().await;
                    fold_into_context(&mut ctx, &released);
                }
                outcomes.extend(released);
            }
        }

        if !merger.is_complete() {
            let rest = merger.finish();
            fold_into_context(shared.get_mut(), &rest);
            outcomes.extend(rest);
        }

        let cancelled = received < segments.len();
        if cancelled {
            log::warn!(
                "Assessment cancelled after {} of {} segments",
                received,
                segments.len()
            );
        }

        Assessment {
            outcomes,
            context: shared.into_inner(),
            cancelled,
        }
    }
}
