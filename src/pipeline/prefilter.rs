//! Cheap heuristic rejection of low-value segments.

use regex::Regex;
use std::collections::HashSet;

use super::segmenter::Segment;
use crate::config::PrefilterSettings;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    TooShortText { length: usize },
    TooShortDuration { seconds: f64 },
    TooMuchFiller { ratio: f64 },
    NoWords,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShortText { length } => write!(f, "text too short ({} chars)", length),
            Self::TooShortDuration { seconds } => write!(f, "segment too short ({:.2}s)", seconds),
            Self::TooMuchFiller { ratio } => write!(f, "filler ratio {:.2}", ratio),
            Self::NoWords => write!(f, "no word tokens"),
        }
    }
}

pub struct PreFilter {
    min_text_length: usize,
    min_segment_duration: f64,
    max_filler_ratio: f64,
    fillers: HashSet<String>,
    token_re: Regex,
}

impl PreFilter {
    pub fn new(settings: &PrefilterSettings) -> Result<Self, AppError> {
        let token_re = Regex::new(r"[\p{L}\p{N}']+")
            .map_err(|e| AppError::Config(format!("invalid token pattern: {}", e)))?;
        Ok(Self {
            min_text_length: settings.min_text_length,
            min_segment_duration: settings.min_segment_duration,
            max_filler_ratio: settings.max_filler_ratio,
            fillers: settings
                .filler_words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .collect(),
            token_re,
        })
    }

    /// Share of lower-cased word tokens that are configured fillers;
    /// `None` when the text has no word token at all.
    pub fn filler_ratio(&self, text: &str) -> Option<f64> {
        let lowered = text.to_lowercase();
        let mut total = 0usize;
        let mut filler = 0usize;
        for token in self.token_re.find_iter(&lowered) {
            total += 1;
            if self.fillers.contains(token.as_str()) {
                filler += 1;
            }
        }
        if total == 0 {
            return None;
        }
        Some(filler as f64 / total as f64)
    }

    pub fn check(&self, segment: &Segment) -> Result<(), Rejection> {
        let length = segment.text.trim().chars().count();
        if length < self.min_text_length {
            return Err(Rejection::TooShortText { length });
        }
        let seconds = segment.duration();
        if seconds < self.min_segment_duration {
            return Err(Rejection::TooShortDuration { seconds });
        }
        match self.filler_ratio(&segment.text) {
            None => return Err(Rejection::NoWords),
            Some(ratio) if ratio > self.max_filler_ratio => {
                return Err(Rejection::TooMuchFiller { ratio });
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Keep passing segments in their original order; returns them and the rejected count.
    pub fn apply(&self, segments: Vec<Segment>) -> (Vec<Segment>, usize) {
        let mut rejected = 0usize;
        let kept = segments
            .into_iter()
            .filter(|segment| match self.check(segment) {
                Ok(()) => true,
                Err(reason) => {
                    log::debug!(
                        "Pre-filter rejected segment {} ({:.1}s-{:.1}s): {}",
                        segment.index,
                        segment.start_time,
                        segment.end_time,
                        reason
                    );
                    rejected += 1;
                    false
                }
            })
            .collect();
        (kept, rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> PreFilter {
        PreFilter::new(&PrefilterSettings::default()).unwrap()
    }

    fn seg(index: usize, start: f64, end: f64, text: &str) -> Segment {
        Segment {
            index,
            video_id: 1,
            start_time: start,
            end_time: end,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_rejects_short_text() {
        let result = filter().check(&seg(0, 0.0, 10.0, "too short"));
        assert_eq!(result, Err(Rejection::TooShortText { length: 9 }));
    }

    #[test]
    fn test_rejects_short_duration() {
        let result = filter().check(&seg(0, 0.0, 1.99, "a perfectly long sentence"));
        assert!(matches!(result, Err(Rejection::TooShortDuration { .. })));
    }

    #[test]
    fn test_boundaries_are_accepted() {
        // exactly 10 chars and exactly 2.0s pass
        assert_eq!(filter().check(&seg(0, 1.0, 3.0, "0123456789")), Ok(()));
    }

    #[test]
    fn test_rejects_filler_heavy_text() {
        let text = "um uh like yeah so um okay race";
        let f = filter();
        assert!(f.filler_ratio(text).unwrap() > 0.7);
        assert!(matches!(
            f.check(&seg(0, 0.0, 5.0, text)),
            Err(Rejection::TooMuchFiller { .. })
        ));
    }

    #[test]
    fn test_filler_ratio_is_case_insensitive() {
        let f = filter();
        assert_eq!(f.filler_ratio("Um UH the car"), Some(0.5));
        assert_eq!(f.filler_ratio("!!! ???"), None);
    }

    #[test]
    fn test_ratio_ceiling_of_one_disables_filler_check() {
        let settings = PrefilterSettings {
            max_filler_ratio: 1.0,
            ..PrefilterSettings::default()
        };
        let f = PreFilter::new(&settings).unwrap();
        assert_eq!(f.check(&seg(0, 0.0, 5.0, "um uh um uh um uh")), Ok(()));
        // Punctuation alone is still not worth judging
        assert_eq!(
            f.check(&seg(1, 0.0, 5.0, "!!! ??? ... ---")),
            Err(Rejection::NoWords)
        );
    }

    #[test]
    fn test_ratio_equal_to_ceiling_passes() {
        let settings = PrefilterSettings {
            max_filler_ratio: 0.5,
            ..PrefilterSettings::default()
        };
        let f = PreFilter::new(&settings).unwrap();
        assert_eq!(f.check(&seg(0, 0.0, 5.0, "um uh the engine")), Ok(()));
    }

    #[test]
    fn test_keeps_content_and_order() {
        let segments = vec![
            seg(0, 0.0, 5.0, "The driver overtakes on the final lap"),
            seg(1, 5.0, 6.0, "Quick word in passing"),
            seg(2, 7.0, 12.0, "um uh um uh um uh"),
            seg(3, 12.0, 20.0, "And the crowd goes absolutely wild"),
        ];
        let (kept, rejected) = filter().apply(segments);
        assert_eq!(rejected, 2);
        let indices: Vec<usize> = kept.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 3]);
    }

    #[test]
    fn test_custom_fillers() {
        let settings = PrefilterSettings {
            filler_words: vec!["Vroom".to_string()],
            max_filler_ratio: 0.5,
            ..PrefilterSettings::default()
        };
        let f = PreFilter::new(&settings).unwrap();
        assert!(f
            .check(&seg(0, 0.0, 5.0, "vroom vroom vroom engine"))
            .is_err());
        assert!(f.check(&seg(0, 0.0, 5.0, "um uh like the engine")).is_ok());
    }
}
