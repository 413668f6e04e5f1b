/// Engine-level error taxonomy.
///
/// Recoverable conditions (stream drops, malformed frames, throttled upload
/// failures) are retried or dropped internally and only show up as
/// connection-health state; the variants here are the ones a caller can
/// actually act on.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("location permission denied")]
    Permission,
    #[error("position upload failed: {0}")]
    Upload(String),
    #[error("route selection rejected: {0}")]
    Selection(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16() == 404).unwrap_or(false) {
            EngineError::NotFound(err.to_string())
        } else {
            EngineError::Transport(err.to_string())
        }
    }
}

/// Why the platform location source failed.
///
/// Surfaced to the caller as-is; the sampler never retries on its own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location provider unavailable")]
    Unavailable,
    #[error("location fix timed out")]
    Timeout,
    #[error("location error: {0}")]
    Unknown(String),
}
