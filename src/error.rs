use std::path::PathBuf;
use thiserror::Error;

/// Failures at the landmark-stream boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The pose detector could not be loaded. Callers degrade to "no landmarks".
    #[error("pose detector unavailable: {0}")]
    Unavailable(String),

    /// The input could not be opened at all. Fatal for this throw.
    #[error("could not open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read error: {0}")]
    Read(#[from] std::io::Error),

    /// A single frame record could not be understood.
    #[error("bad frame record on line {line}: {message}")]
    Decode { line: usize, message: String },

    #[error("source is not open")]
    NotOpen,
}

impl SourceError {
    /// Whether the throw can still be analysed (with fewer or no landmarks).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_) | SourceError::Decode { .. })
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file {} not found", .0.display())]
    NotFound(PathBuf),

    #[error("model I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service rejected the request itself (HTTP 400).
    #[error("request rejected by analysis service: {0}")]
    Malformed(String),

    #[error("analysis service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode analysis response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0} s")]
    Timeout(u64),

    #[error("could not read video: {0}")]
    Io(#[from] std::io::Error),
}
