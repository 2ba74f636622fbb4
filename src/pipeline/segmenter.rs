//! Transcript spans → candidate segments.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::SegmenterSettings;
use crate::error::AppError;

/// One timed piece of text as produced by the transcription engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSpan {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A candidate span of transcript under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Position in chronological order, starting at 0.
    pub index: usize,
    pub video_id: i64,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Timestamp a highlight from this segment is anchored at.
    pub fn midpoint(&self) -> f64 {
        self.start_time + self.duration() / 2.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub segments: Vec<Segment>,
    pub invalid_spans: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TranscriptFile {
    Spans(Vec<TranscriptSpan>),
    Wrapped { segments: Vec<TranscriptSpan> },
}

/// Read a transcript JSON file: either a bare span array or `{"segments": [...]}`.
pub fn load_transcript(path: &Path) -> Result<Vec<TranscriptSpan>, AppError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::Io(format!("Failed to read transcript {:?}: {}", path, e)))?;
    let parsed: TranscriptFile = serde_json::from_str(&raw)?;
    Ok(match parsed {
        TranscriptFile::Spans(spans) => spans,
        TranscriptFile::Wrapped { segments } => segments,
    })
}

pub fn validate_span(span: &TranscriptSpan) -> Result<(), AppError> {
    if !span.start.is_finite() || !span.end.is_finite() {
        return Err(AppError::Validation(format!(
            "span has non-finite bounds ({}, {})",
            span.start, span.end
        )));
    }
    if span.start < 0.0 {
        return Err(AppError::Validation(format!(
            "span starts before zero ({:.2}s)",
            span.start
        )));
    }
    if span.end < span.start {
        return Err(AppError::Validation(format!(
            "span ends before it starts ({:.2}s > {:.2}s)",
            span.start, span.end
        )));
    }
    if span.text.trim().is_empty() {
        return Err(AppError::Validation(format!(
            "span at {:.2}s has no text",
            span.start
        )));
    }
    Ok(())
}

/// Merge adjacent spans into ordered, non-overlapping segments.
///
/// Spans whose gap to the open segment is below `merge_gap_seconds` are
/// folded into it while it stays under `max_segment_duration`. Overlapping
/// spans are always folded so the output never overlaps.
pub fn segment_transcript(
    video_id: i64,
    spans: &[TranscriptSpan],
    settings: &SegmenterSettings,
) -> Segmentation {
    let mut invalid_spans = 0usize;
    let mut valid: Vec<&TranscriptSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match validate_span(span) {
            Ok(()) => valid.push(span),
            Err(e) => {
                log::warn!("Dropping transcript span: {}", e);
                invalid_spans += 1;
            }
        }
    }
    valid.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut segments: Vec<Segment> = Vec::new();
    let mut open: Option<Segment> = None;

    for span in valid {
        let text = span.text.trim();
        if let Some(current) = open.as_mut() {
            let overlaps = span.start < current.end_time;
            let gap = span.start - current.end_time;
            let fits = span.end.max(current.end_time) - current.start_time
                <= settings.max_segment_duration;
            if overlaps || (gap < settings.merge_gap_seconds && fits) {
                current.end_time = current.end_time.max(span.end);
                current.text.push(' ');
                current.text.push_str(text);
                continue;
            }
        }
        if let Some(done) = open.take() {
            segments.push(done);
        }
        open = Some(Segment {
            index: segments.len(),
            video_id,
            start_time: span.start,
            end_time: span.end,
            text: text.to_string(),
        });
    }
    if let Some(done) = open {
        segments.push(done);
    }

    log::debug!(
        "Segmented {} spans into {} segments ({} invalid)",
        spans.len(),
        segments.len(),
        invalid_spans
    );

    Segmentation {
        segments,
        invalid_spans,
    }
}
