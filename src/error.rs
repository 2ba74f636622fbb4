use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Typed error hierarchy shared by the indexing pipeline and the retrieval API.
///
/// Serializes as a plain string so HTTP clients receive a readable
/// `{"error": "..."}` body, while Rust code can match on the variant to
/// decide whether a failure is retryable or local to a segment or batch.
#[derive(Debug, Error)]
pub enum AppError {
    /// Timeout, rate limit or connection failure talking to an external model.
    #[error("transient external failure: {0}")]
    TransientExternal(String),

    /// Non-retryable failure reported by an external model.
    #[error("external failure: {0}")]
    External(String),

    /// A judgment response that does not satisfy the judgment schema.
    #[error("malformed judgment: {0}")]
    SchemaParse(String),

    /// A transactional write that was rolled back.
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Database(String),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether the failure may succeed if the same call is simply repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientExternal(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Serialize as a plain string.
impl serde::Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self }))).into_response()
    }
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        // The database layer wraps typed errors in anyhow; recover them.
        match e.downcast::<AppError>() {
            Ok(app) => app,
            Err(e) => AppError::Database(e.to_string()),
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Other(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Other(s.to_string())
    }
}
