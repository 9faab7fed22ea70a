use http::StatusCode;

/// LogError is the commit log's error taxonomy. Every variant carries an
/// HTTP-style status code for the wire surface.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The queried state (a prepared or committed record) is absent.
    #[error("not found")]
    NotFound,

    /// The caller supplied an out-of-sequence version or an operation the
    /// service rejected.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The service refused to grant the operation's resources. Safe to
    /// retry with backoff.
    #[error("resource busy")]
    ResourceBusy,

    /// Storage, encoding, or service failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LogError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LogError::NotFound => StatusCode::NOT_FOUND,
            LogError::BadRequest(_) => StatusCode::BAD_REQUEST,
            LogError::ResourceBusy => StatusCode::SERVICE_UNAVAILABLE,
            LogError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn internal(err: impl std::fmt::Display) -> Self {
        LogError::Internal(err.to_string())
    }
}
