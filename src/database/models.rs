use serde::{Deserialize, Serialize};

/// Metadata supplied for a video before any of its highlights exist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoMetadata {
    pub filename: String,
    pub duration: f64,
    pub fps: f64,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: i64,
    pub filename: String,
    pub duration: f64,
    pub fps: f64,
    pub width: i64,
    pub height: i64,
    pub summary: Option<String>,
    pub created_at: String,
}

/// An accepted highlight with its embedding, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHighlight {
    pub timestamp: f64,
    pub description: String,
    pub summary: String,
    pub category: String,
    pub quality_score: u8,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Highlight {
    pub id: i64,
    pub video_id: i64,
    pub timestamp: f64,
    pub description: String,
    pub summary: String,
    pub category: String,
    pub quality_score: u8,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub created_at: String,
}

/// A highlight ranked against a query vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredHighlight {
    pub id: i64,
    pub video_id: i64,
    pub video_name: String,
    pub description: String,
    pub timestamp: f64,
    pub similarity_score: f32,
}

/// Outcome of one batch commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCommit {
    pub video_id: i64,
    pub inserted: usize,
    /// Rows that already existed for the same (video, timestamp).
    pub skipped: usize,
}

impl From<&Video> for VideoMetadata {
    fn from(video: &Video) -> Self {
        Self {
            filename: video.filename.clone(),
            duration: video.duration,
            fps: video.fps,
            width: video.width,
            height: video.height,
        }
    }
}
